use crate::jvm::BinaryName;
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Source of class file bytes, looked up by class name
///
/// Implementations only hand out bytes: nothing obtained through a class path is ever loaded or
/// executed. A lookup that fails for any reason is treated as the class not existing.
pub trait ClassPath: Send + Sync {
    /// Read the complete class file for a class
    fn open_class(&self, name: &BinaryName) -> Option<Vec<u8>>;
}

/// Class files laid out under a root directory (`java/lang/Object` is `<root>/java/lang/Object.class`)
#[derive(Debug, Clone)]
pub struct DirectoryClassPath {
    root: PathBuf,
}

impl DirectoryClassPath {
    pub fn new(root: impl Into<PathBuf>) -> DirectoryClassPath {
        DirectoryClassPath { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ClassPath for DirectoryClassPath {
    fn open_class(&self, name: &BinaryName) -> Option<Vec<u8>> {
        let path = self.root.join(name.class_file_path());
        match fs::read(&path) {
            Ok(bytes) => Some(bytes),
            Err(err) if err.kind() == ErrorKind::NotFound => None,
            Err(err) => {
                log::warn!("Failed to read {}: {}", path.display(), err);
                None
            }
        }
    }
}

/// Class files held in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryClassPath {
    classes: HashMap<BinaryName, Vec<u8>>,
}

impl MemoryClassPath {
    pub fn new() -> MemoryClassPath {
        MemoryClassPath::default()
    }

    /// Add (or replace) the bytes for a class
    pub fn insert(&mut self, name: BinaryName, bytes: Vec<u8>) {
        self.classes.insert(name, bytes);
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

impl ClassPath for MemoryClassPath {
    fn open_class(&self, name: &BinaryName) -> Option<Vec<u8>> {
        self.classes.get(name).cloned()
    }
}

/// Sequence of class paths, searched in order
#[derive(Default)]
pub struct CompositeClassPath {
    entries: Vec<Box<dyn ClassPath>>,
}

impl CompositeClassPath {
    pub fn new() -> CompositeClassPath {
        CompositeClassPath::default()
    }

    /// Add a class path to search after all of the current ones
    pub fn push(&mut self, class_path: impl ClassPath + 'static) {
        self.entries.push(Box::new(class_path));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ClassPath for CompositeClassPath {
    fn open_class(&self, name: &BinaryName) -> Option<Vec<u8>> {
        self.entries
            .iter()
            .find_map(|class_path| class_path.open_class(name))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::Name;

    fn name(name: &str) -> BinaryName {
        BinaryName::from_string(name.to_owned()).unwrap()
    }

    #[test]
    fn composite_prefers_earlier_entries() {
        let mut first = MemoryClassPath::new();
        first.insert(name("a/A"), vec![1]);
        let mut second = MemoryClassPath::new();
        second.insert(name("a/A"), vec![2]);
        second.insert(name("b/B"), vec![3]);

        let mut composite = CompositeClassPath::new();
        composite.push(first);
        composite.push(second);

        assert_eq!(composite.open_class(&name("a/A")), Some(vec![1]));
        assert_eq!(composite.open_class(&name("b/B")), Some(vec![3]));
        assert_eq!(composite.open_class(&name("c/C")), None);
    }

    #[test]
    fn directory_lookup() {
        let root = std::env::temp_dir().join(format!("class-path-test-{}", std::process::id()));
        fs::create_dir_all(root.join("demo")).unwrap();
        fs::write(root.join("demo/Present.class"), [0xca, 0xfe]).unwrap();

        let class_path = DirectoryClassPath::new(&root);
        assert_eq!(
            class_path.open_class(&name("demo/Present")),
            Some(vec![0xca, 0xfe])
        );
        assert_eq!(class_path.open_class(&name("demo/Absent")), None);

        fs::remove_dir_all(&root).unwrap();
    }
}
