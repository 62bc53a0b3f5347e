use crate::database::{Database, DbFlags};
use crate::error::{EdiError, Result};
use crate::mdb::MdbProvider;
use crate::provider::Provider;
use crate::record::Record;
use crate::validation;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

/// A record validation function. Returns false when the record fails.
pub type Validator = Arc<dyn Fn(&Record) -> bool + Send + Sync>;

/// Registry of storage providers and record validators.
///
/// Registration happens at startup; afterwards the registry is only read,
/// and reads never block each other.
pub struct Service {
    providers: RwLock<HashMap<String, Arc<dyn Provider>>>,
    validations: RwLock<HashMap<String, Validator>>,
}

static SERVICE: OnceLock<Arc<Service>> = OnceLock::new();

impl Service {
    /// An empty service with no providers.
    pub fn new() -> Self {
        Service {
            providers: RwLock::new(HashMap::new()),
            validations: RwLock::new(HashMap::new()),
        }
    }

    /// A service with the built-in providers registered.
    pub fn with_builtin() -> Self {
        let service = Service::new();
        service.register_provider(Arc::new(MdbProvider));
        service
    }

    /// The process-wide service, created with the built-in providers on first use.
    pub fn global() -> &'static Arc<Service> {
        SERVICE.get_or_init(|| Arc::new(Service::with_builtin()))
    }

    /// Register a provider under its name, replacing any earlier registration.
    pub fn register_provider(&self, provider: Arc<dyn Provider>) {
        let name = provider.name().to_string();
        log::debug!("Registering database provider '{name}'");
        self.providers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, provider);
    }

    /// Register a validator. A name of `"<table>"` checks whole records of that
    /// table; `"<table>.<column>"` checks one column and flags that field.
    pub fn register_validation<F>(&self, name: &str, validator: F)
    where
        F: Fn(&Record) -> bool + Send + Sync + 'static,
    {
        self.register_validator(name, Arc::new(validator));
    }

    /// Register an already shared validator, such as one built by
    /// [`validation::one_of`].
    pub fn register_validator(&self, name: &str, validator: Validator) {
        self.validations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), validator);
    }

    pub fn provider(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn provider_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn validation(&self, name: &str) -> Option<Validator> {
        self.validations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Open a database with the named provider.
    pub fn open(self: &Arc<Self>, provider: &str, path: &str, flags: DbFlags) -> Result<Database> {
        let provider = self
            .provider(provider)
            .ok_or_else(|| EdiError::UnknownProvider(provider.to_string()))?;
        let backend = provider.open(path, flags)?;
        log::debug!("Opened '{}' database at '{path}' with flags {flags:?}", provider.name());
        Ok(Database::new(Arc::clone(self), provider, path, flags, backend))
    }

    /// Remove a database's persisted storage without opening it.
    pub fn delete(&self, provider: &str, path: &str) -> Result<()> {
        let provider = self
            .provider(provider)
            .ok_or_else(|| EdiError::UnknownProvider(provider.to_string()))?;
        provider.delete(path)
    }

    /// Run the validators registered for the record's table. See
    /// [`validation::validate_with`].
    pub fn validate_record(&self, record: &mut Record) -> bool {
        // Validators run without the lock held so they may register others.
        let validations: HashMap<String, Validator> = {
            let table = record.table();
            self.validations
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .filter(|(name, _)| {
                    name.strip_prefix(table)
                        .is_some_and(|rest| rest.is_empty() || rest.starts_with('.'))
                })
                .map(|(name, validator)| (name.clone(), validator.clone()))
                .collect()
        };
        validation::validate_with(&validations, record)
    }
}

impl Default for Service {
    fn default() -> Self {
        Service::new()
    }
}

/// Register a provider with the process-wide service.
pub fn register_provider(provider: Arc<dyn Provider>) {
    Service::global().register_provider(provider);
}

/// Register a validator with the process-wide service.
pub fn register_validation<F>(name: &str, validator: F)
where
    F: Fn(&Record) -> bool + Send + Sync + 'static,
{
    Service::global().register_validation(name, validator);
}

/// Open a database through the process-wide service.
pub fn open(provider: &str, path: &str, flags: DbFlags) -> Result<Database> {
    Service::global().open(provider, path, flags)
}

/// Validate a record with the validators of the service its database was
/// opened through, or the process-wide service for detached records.
pub fn validate_record(record: &mut Record) -> bool {
    match record.database() {
        Some(db) => db.validate_record(record),
        None => Service::global().validate_record(record),
    }
}
