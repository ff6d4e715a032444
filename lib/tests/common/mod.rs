//! Assembling small class files by hand

#![allow(dead_code)]

use preverifier::jvm::class_file::{
    Attribute, BytecodeArray, BytecodeIndex, ClassFile, Code, ConstantsPool, Field, LocalVariable,
    LocalVariableTable, Method, Version,
};
use preverifier::jvm::class_graph::{MemoryClassPath, TypeResolver};
use preverifier::jvm::{BinaryName, ClassAccessFlags, FieldAccessFlags, MethodAccessFlags, Name};

pub struct ClassBuilder {
    pub constants: ConstantsPool,
    name: String,
    super_name: String,
    fields: Vec<Field>,
    methods: Vec<Method>,
}

impl ClassBuilder {
    pub fn new(name: &str, super_name: &str) -> ClassBuilder {
        ClassBuilder {
            constants: ConstantsPool::new(),
            name: name.to_owned(),
            super_name: super_name.to_owned(),
            fields: vec![],
            methods: vec![],
        }
    }

    pub fn field(
        &mut self,
        access_flags: FieldAccessFlags,
        name: &str,
        descriptor: &str,
    ) -> &mut Self {
        let field = Field {
            access_flags,
            name_index: self.constants.get_utf8(name).unwrap(),
            descriptor_index: self.constants.get_utf8(descriptor).unwrap(),
            attributes: vec![],
        };
        self.fields.push(field);
        self
    }

    /// Field with a `ConstantValue` of an `int`
    pub fn int_constant_field(
        &mut self,
        access_flags: FieldAccessFlags,
        name: &str,
        value: i32,
    ) -> &mut Self {
        let value_index = self.constants.get_integer(value).unwrap();
        let attribute = Attribute {
            name_index: self.constants.get_utf8("ConstantValue").unwrap(),
            info: value_index.0.to_be_bytes().to_vec(),
        };
        self.field(access_flags, name, "I");
        self.fields.last_mut().unwrap().attributes.push(attribute);
        self
    }

    pub fn native_method(&mut self, name: &str, descriptor: &str) -> &mut Self {
        self.abstract_or_native(
            MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC | MethodAccessFlags::NATIVE,
            name,
            descriptor,
        )
    }

    pub fn abstract_or_native(
        &mut self,
        access_flags: MethodAccessFlags,
        name: &str,
        descriptor: &str,
    ) -> &mut Self {
        let method = Method {
            access_flags,
            name_index: self.constants.get_utf8(name).unwrap(),
            descriptor_index: self.constants.get_utf8(descriptor).unwrap(),
            attributes: vec![],
        };
        self.methods.push(method);
        self
    }

    pub fn method(
        &mut self,
        access_flags: MethodAccessFlags,
        name: &str,
        descriptor: &str,
        max_stack: u16,
        max_locals: u16,
        bytecode: Vec<u8>,
    ) -> &mut Self {
        self.method_with_locals(
            access_flags,
            name,
            descriptor,
            max_stack,
            max_locals,
            bytecode,
            &[],
        )
    }

    /// Method whose `LocalVariableTable` has one `(name, descriptor, slot)` entry per local, each
    /// live over the whole code
    #[allow(clippy::too_many_arguments)]
    pub fn method_with_locals(
        &mut self,
        access_flags: MethodAccessFlags,
        name: &str,
        descriptor: &str,
        max_stack: u16,
        max_locals: u16,
        bytecode: Vec<u8>,
        locals: &[(&str, &str, u16)],
    ) -> &mut Self {
        let mut attributes = vec![];
        if !locals.is_empty() {
            let mut table = vec![];
            for (local_name, local_descriptor, index) in locals {
                table.push(LocalVariable {
                    start_pc: BytecodeIndex(0),
                    length: bytecode.len() as u16,
                    name_index: self.constants.get_utf8(*local_name).unwrap(),
                    descriptor_index: self.constants.get_utf8(*local_descriptor).unwrap(),
                    index: *index,
                });
            }
            let table = LocalVariableTable(table);
            attributes.push(self.constants.get_attribute(&table).unwrap());
        }
        let code = Code {
            max_stack,
            max_locals,
            code_array: BytecodeArray(bytecode),
            exception_table: vec![],
            attributes,
        };
        let method = Method {
            access_flags,
            name_index: self.constants.get_utf8(name).unwrap(),
            descriptor_index: self.constants.get_utf8(descriptor).unwrap(),
            attributes: vec![self.constants.get_attribute(&code).unwrap()],
        };
        self.methods.push(method);
        self
    }

    /// Default constructor calling `super()`
    pub fn constructor(&mut self) -> &mut Self {
        let super_name = self.super_name.clone();
        let init = self
            .constants
            .get_method_ref(&super_name, "<init>", "()V", false)
            .unwrap();
        let [hi, lo] = (init.0).0.to_be_bytes();
        self.method(
            MethodAccessFlags::PUBLIC,
            "<init>",
            "()V",
            1,
            1,
            vec![
                0x2a, // aload_0
                0xb7, hi, lo, // invokespecial super.<init>
                0xb1, // return
            ],
        )
    }

    pub fn build(&mut self) -> Vec<u8> {
        let this_class = self.constants.get_class(self.name.clone()).unwrap();
        let super_class = self.constants.get_class(self.super_name.clone()).unwrap();
        let class = ClassFile {
            version: Version::JAVA1_1,
            constants: self.constants.clone(),
            access_flags: ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
            this_class,
            super_class: Some(super_class),
            interfaces: vec![],
            fields: self.fields.clone(),
            methods: self.methods.clone(),
            attributes: vec![],
        };
        class.to_bytes().unwrap()
    }
}

/// Empty class, good enough for the resolver to read its header
pub fn stub_class(name: &str, super_name: Option<&str>) -> Vec<u8> {
    let mut constants = ConstantsPool::new();
    let this_class = constants.get_class(name).unwrap();
    let super_class = super_name.map(|super_name| constants.get_class(super_name).unwrap());
    let class = ClassFile {
        version: Version::JAVA1_1,
        constants,
        access_flags: ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
        this_class,
        super_class,
        interfaces: vec![],
        fields: vec![],
        methods: vec![],
        attributes: vec![],
    };
    class.to_bytes().unwrap()
}

pub fn name(name: &str) -> BinaryName {
    BinaryName::from_string(name.to_owned()).unwrap()
}

/// Resolver over a tiny `java.lang` (plus whatever else is passed in)
pub fn resolver(extra: &[(&str, &str)]) -> TypeResolver {
    let mut class_path = MemoryClassPath::new();
    class_path.insert(name("java/lang/Object"), stub_class("java/lang/Object", None));
    let library = [
        ("java/lang/Number", "java/lang/Object"),
        ("java/lang/Float", "java/lang/Number"),
        ("java/lang/Double", "java/lang/Number"),
        ("java/lang/Integer", "java/lang/Number"),
        ("java/lang/String", "java/lang/Object"),
        ("java/lang/Throwable", "java/lang/Object"),
    ];
    for (class, super_class) in library.iter().chain(extra.iter()) {
        class_path.insert(name(class), stub_class(class, Some(super_class)));
    }
    TypeResolver::new(class_path)
}
