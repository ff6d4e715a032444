use super::{ClassPreverifier, ErrorRecord, Policy, PreverificationResults};
use crate::jvm::class_graph::TypeResolver;

/// Named entry of an archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Path of the entry inside the archive (eg. `demo/Main.class`)
    pub name: String,
    pub bytes: Vec<u8>,
}

impl ArchiveEntry {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> ArchiveEntry {
        ArchiveEntry {
            name: name.into(),
            bytes,
        }
    }

    pub fn is_class(&self) -> bool {
        self.name.ends_with(".class")
    }
}

/// Callbacks for following along as an archive is processed
///
/// Every entry gets exactly one `entry_begin` and, unless processing stopped there, one matching
/// `entry_end`. Returning `false` from either one stops processing: no further entries are
/// looked at, and an entry stopped at `entry_begin` produces no output.
pub trait ArchiveListener {
    fn file_begin(&mut self, _archive: &str) {}

    fn entry_begin(&mut self, _archive: &str, _entry: &str) -> bool {
        true
    }

    /// `results` is `None` for entries that are copied as-is
    fn entry_end(
        &mut self,
        _archive: &str,
        _entry: &str,
        _results: Option<&PreverificationResults>,
    ) -> bool {
        true
    }

    fn file_end(&mut self, _archive: &str) {}
}

/// Listener that never stops processing
pub struct NullArchiveListener;

impl ArchiveListener for NullArchiveListener {}

/// What came out of processing an archive
#[derive(Debug, Default)]
pub struct ArchiveOutcome {
    /// Output entries, in the same order as in the input
    ///
    /// Classes that failed preverification are missing.
    pub entries: Vec<ArchiveEntry>,

    /// Errors of every class that failed, by entry name
    pub errors: Vec<(String, Vec<ErrorRecord>)>,

    /// Did a listener stop processing before the end?
    pub stopped: bool,
}

impl ArchiveOutcome {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty() && !self.stopped
    }
}

/// Preverifies every class of an archive, copying other entries through
pub struct ArchivePreverifier<'a> {
    classes: ClassPreverifier<'a>,
}

impl<'a> ArchivePreverifier<'a> {
    pub fn new(policy: &'a Policy, resolver: &'a TypeResolver) -> ArchivePreverifier<'a> {
        ArchivePreverifier {
            classes: ClassPreverifier::new(policy, resolver),
        }
    }

    /// Process archive entries in order
    pub fn preverify(
        &self,
        archive: &str,
        entries: impl IntoIterator<Item = ArchiveEntry>,
        listener: &mut dyn ArchiveListener,
    ) -> ArchiveOutcome {
        let mut outcome = ArchiveOutcome::default();
        listener.file_begin(archive);

        for entry in entries {
            if !listener.entry_begin(archive, &entry.name) {
                log::info!("Stopped before {} in {}", entry.name, archive);
                outcome.stopped = true;
                break;
            }

            let keep_going = if entry.is_class() {
                let results = self.classes.preverify(&entry.bytes);
                let keep_going = listener.entry_end(archive, &entry.name, Some(&results));
                match results.into_outcome() {
                    Ok(bytes) => outcome.entries.push(ArchiveEntry::new(entry.name, bytes)),
                    Err(errors) => {
                        log::warn!(
                            "{} in {} failed preverification with {} errors",
                            entry.name,
                            archive,
                            errors.len()
                        );
                        outcome.errors.push((entry.name, errors));
                    }
                }
                keep_going
            } else {
                let keep_going = listener.entry_end(archive, &entry.name, None);
                outcome.entries.push(entry);
                keep_going
            };

            if !keep_going {
                outcome.stopped = true;
                break;
            }
        }

        listener.file_end(archive);
        log::info!(
            "{}: {} entries written, {} classes failed",
            archive,
            outcome.entries.len(),
            outcome.errors.len()
        );
        outcome
    }
}
