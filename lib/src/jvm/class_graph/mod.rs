//! Class hierarchy, as seen through a class path
//!
//! Answering subtyping questions never requires loading (let alone running) a class: the
//! [`TypeResolver`] reads only the header of each class file it needs (super class and
//! interfaces) and remembers it for the rest of the run. Headers are found through a pluggable
//! [`ClassPath`].

mod class_path;

pub use class_path::*;

use crate::jvm::class_file::ClassHeader;
use crate::jvm::{BinaryName, ClassAccessFlags, FieldType, RefType};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// Reasons a class cannot be placed in the hierarchy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// Class is not on the class path (or its class file is unreadable)
    NotFound(BinaryName),

    /// Following super classes leads back to this class
    Circular(BinaryName),
}

impl ResolveError {
    /// Class that could not be resolved
    pub fn class_name(&self) -> &BinaryName {
        match self {
            ResolveError::NotFound(name) | ResolveError::Circular(name) => name,
        }
    }
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolveError::NotFound(name) => write!(f, "class {} not found", name),
            ResolveError::Circular(name) => write!(f, "class {} is its own super class", name),
        }
    }
}

impl std::error::Error for ResolveError {}

/// Resolves class names to their place in the class hierarchy
///
/// The resolver is shared by every class being preverified in a run, possibly from multiple
/// threads. Headers are cached by name (including negative lookups); two threads racing to
/// resolve the same class may both read it, but only the first result is kept.
pub struct TypeResolver {
    class_path: Box<dyn ClassPath>,
    headers: RwLock<HashMap<BinaryName, Option<Arc<ClassHeader>>>>,
}

impl TypeResolver {
    pub fn new(class_path: impl ClassPath + 'static) -> TypeResolver {
        TypeResolver {
            class_path: Box::new(class_path),
            headers: RwLock::new(HashMap::new()),
        }
    }

    /// Header of a class, read from the class path on first use
    pub fn header(&self, name: &BinaryName) -> Result<Arc<ClassHeader>, ResolveError> {
        let cached = self
            .headers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned();
        let header = match cached {
            Some(header) => header,
            None => {
                let loaded = self.load_header(name);
                self.headers
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .entry(name.clone())
                    .or_insert(loaded)
                    .clone()
            }
        };
        header.ok_or_else(|| ResolveError::NotFound(name.clone()))
    }

    /// Make a class known without going through the class path
    ///
    /// This is how classes that are themselves being preverified become resolvable. A class that
    /// was already found keeps its first header.
    pub fn register(&self, header: ClassHeader) {
        let mut headers = self.headers.write().unwrap_or_else(PoisonError::into_inner);
        let slot = headers.entry(header.name.clone()).or_insert(None);
        if slot.is_none() {
            *slot = Some(Arc::new(header));
        }
    }

    fn load_header(&self, name: &BinaryName) -> Option<Arc<ClassHeader>> {
        if name == &BinaryName::OBJECT {
            return Some(Arc::new(ClassHeader {
                access_flags: ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
                name: BinaryName::OBJECT,
                super_class: None,
                interfaces: vec![],
            }));
        }

        log::debug!("Resolving {} through the class path", name);
        let bytes = self.class_path.open_class(name)?;
        match ClassHeader::parse(&bytes) {
            Ok(header) if &header.name == name => Some(Arc::new(header)),
            Ok(header) => {
                log::warn!("Class file for {} defines {} instead", name, header.name);
                None
            }
            Err(err) => {
                log::warn!("Class file for {} is malformed: {}", name, err);
                None
            }
        }
    }

    /// Super class chain of a class, starting with the class itself and ending at the root
    pub fn ancestor_chain(&self, name: &BinaryName) -> Result<Vec<BinaryName>, ResolveError> {
        let mut chain = vec![];
        let mut dont_revisit: HashSet<BinaryName> = HashSet::new();
        let mut next_class = Some(name.clone());

        while let Some(class) = next_class {
            if !dont_revisit.insert(class.clone()) {
                return Err(ResolveError::Circular(class));
            }
            next_class = self.header(&class)?.super_class.clone();
            chain.push(class);
        }

        Ok(chain)
    }

    /// Closest class that both classes extend
    ///
    /// Interfaces are not considered: two classes implementing the same interface meet at their
    /// common super class (often `java/lang/Object`).
    pub fn common_superclass(
        &self,
        class1: &BinaryName,
        class2: &BinaryName,
    ) -> Result<BinaryName, ResolveError> {
        if class1 == class2 {
            return Ok(class1.clone());
        }

        let chain2 = self.ancestor_chain(class2)?;
        let supertypes2: HashSet<&BinaryName> = chain2.iter().collect();
        Ok(self
            .ancestor_chain(class1)?
            .into_iter()
            .find(|class| supertypes2.contains(class))
            .unwrap_or(BinaryName::OBJECT))
    }

    /// Closest reference type that both reference types are assignable to
    ///
    /// This is the least upper bound used when merging two object types on different control flow
    /// paths.
    pub fn common_ref_type(
        &self,
        type1: &RefType<BinaryName>,
        type2: &RefType<BinaryName>,
    ) -> Result<RefType<BinaryName>, ResolveError> {
        if type1 == type2 {
            return Ok(type1.clone());
        }

        match (type1, type2) {
            (RefType::Object(class1), RefType::Object(class2)) => {
                Ok(RefType::Object(self.common_superclass(class1, class2)?))
            }

            // Special superclass and interfaces of all arrays
            (RefType::Object(class), _) | (_, RefType::Object(class)) => {
                if Self::is_array_supertype(class) {
                    Ok(RefType::Object(class.clone()))
                } else {
                    Ok(RefType::Object(BinaryName::OBJECT))
                }
            }

            // Arrays of references meet at an array of the common element type
            _ => match (type1.array_element(), type2.array_element()) {
                (Some(FieldType::Ref(elem1)), Some(FieldType::Ref(elem2))) => {
                    let elem = self.common_ref_type(&elem1, &elem2)?;
                    Ok(RefType::array(FieldType::Ref(elem)))
                }
                _ => Ok(RefType::Object(BinaryName::OBJECT)),
            },
        }
    }

    /// Check if arrays can be assigned to a class type
    ///
    /// This bakes in knowledge of the small, finite set of super types arrays have.
    fn is_array_supertype(class: &BinaryName) -> bool {
        class == &BinaryName::OBJECT
            || class == &BinaryName::CLONEABLE
            || class == &BinaryName::SERIALIZABLE
    }
}
