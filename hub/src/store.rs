use std::collections::HashMap;
use std::fs;
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::RwLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The (service, address) pair is already present.
    #[error("service already registered")]
    AlreadyRegistered,

    #[error("failed to persist registry snapshot: {0}")]
    Snapshot(#[from] std::io::Error),

    #[error("corrupt registry snapshot: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// The mapping from service name to the set of live agent addresses.
///
/// A service may run many replicas, each with its own embedded agent, so a
/// name maps to a list. Implementations serialize their own access.
pub trait ServiceRegistry: Send + Sync {
    /// Records `address` as a replica of `name`.
    fn add(&self, name: &str, address: &str) -> Result<(), StoreError>;

    /// Addresses registered for `name`, empty when unknown.
    fn get(&self, name: &str) -> Vec<String>;

    fn get_all(&self) -> HashMap<String, Vec<String>>;

    /// Deletes `address` from every service that lists it. Services left
    /// without addresses are kept.
    fn remove(&self, address: &str) -> Result<(), StoreError>;

    /// Wipes every entry.
    fn init(&self) -> Result<(), StoreError>;
}

fn add_entry(
    entries: &mut HashMap<String, Vec<String>>,
    name: &str,
    address: &str,
) -> Result<(), StoreError> {
    let addresses = entries.entry(name.to_string()).or_default();
    if addresses.iter().any(|a| a == address) {
        return Err(StoreError::AlreadyRegistered);
    }
    addresses.push(address.to_string());
    Ok(())
}

fn remove_entry(entries: &mut HashMap<String, Vec<String>>, address: &str) {
    for addresses in entries.values_mut() {
        addresses.retain(|a| a != address);
    }
}

/// Registry that lives only as long as the hub process.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Vec<String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ServiceRegistry for MemoryStore {
    fn add(&self, name: &str, address: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.write().expect("registry lock poisoned");
        add_entry(&mut entries, name, address)
    }

    fn get(&self, name: &str) -> Vec<String> {
        let entries = self.entries.read().expect("registry lock poisoned");
        entries.get(name).cloned().unwrap_or_default()
    }

    fn get_all(&self) -> HashMap<String, Vec<String>> {
        self.entries.read().expect("registry lock poisoned").clone()
    }

    fn remove(&self, address: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.write().expect("registry lock poisoned");
        remove_entry(&mut entries, address);
        Ok(())
    }

    fn init(&self) -> Result<(), StoreError> {
        self.entries.write().expect("registry lock poisoned").clear();
        Ok(())
    }
}

/// Registry backed by a JSON snapshot, rewritten atomically on every
/// mutation and reloaded on startup.
pub struct FileStore {
    path: PathBuf,
    entries: RwLock<HashMap<String, Vec<String>>>,
}

impl FileStore {
    /// Opens the snapshot at `path`, starting empty when the file is absent.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let entries = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    fn save(&self, entries: &HashMap<String, Vec<String>>) -> Result<(), StoreError> {
        let data = serde_json::to_vec_pretty(entries)?;
        let tmp = self.path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&data)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl ServiceRegistry for FileStore {
    fn add(&self, name: &str, address: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.write().expect("registry lock poisoned");
        add_entry(&mut entries, name, address)?;
        self.save(&entries)
    }

    fn get(&self, name: &str) -> Vec<String> {
        let entries = self.entries.read().expect("registry lock poisoned");
        entries.get(name).cloned().unwrap_or_default()
    }

    fn get_all(&self) -> HashMap<String, Vec<String>> {
        self.entries.read().expect("registry lock poisoned").clone()
    }

    fn remove(&self, address: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.write().expect("registry lock poisoned");
        remove_entry(&mut entries, address);
        self.save(&entries)
    }

    fn init(&self) -> Result<(), StoreError> {
        let mut entries = self.entries.write().expect("registry lock poisoned");
        entries.clear();
        self.save(&entries)
    }
}
