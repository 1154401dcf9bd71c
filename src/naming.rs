//! Mapping between instance names and the OS accounts that back them.
//!
//! An instance `foo` owned by operator `alice` lives in the account
//! `brewbox_alice_foo`. The operator segment is configuration, not a global,
//! so the mapping can be exercised for any operator.

use crate::error::BrewboxError;

pub const RESERVED_PREFIX: &str = "brewbox_";
pub const DEFAULT_INSTANCE: &str = "default";
pub const TEMPLATE_SCHEME: &str = "template://";

const MAX_NAME_LEN: usize = 76;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceRef {
    Default,
    Literal(String),
}

impl InstanceRef {
    pub fn parse(positional: &str) -> Result<Option<Self>, BrewboxError> {
        if positional.is_empty() {
            return Ok(None);
        }
        match positional.strip_prefix(TEMPLATE_SCHEME) {
            Some("default") => Ok(Some(InstanceRef::Default)),
            Some(_) => Err(BrewboxError::UnknownTemplate(positional.to_string())),
            None => Ok(Some(InstanceRef::Literal(positional.to_string()))),
        }
    }
}

pub fn resolve_instance_name(positional: &str, flag_name: &str) -> Result<String, BrewboxError> {
    let mut name = DEFAULT_INSTANCE.to_string();
    if !flag_name.is_empty() {
        if flag_name.contains('/') {
            return Err(BrewboxError::InvalidFlag(flag_name.to_string()));
        }
        name = flag_name.to_string();
    }
    match InstanceRef::parse(positional)? {
        None | Some(InstanceRef::Default) => Ok(name),
        Some(InstanceRef::Literal(literal)) => {
            if !flag_name.is_empty() && literal != flag_name {
                return Err(BrewboxError::ConflictingNames {
                    positional: literal,
                    flag: flag_name.to_string(),
                });
            }
            Ok(literal)
        }
    }
}

pub fn validate_name(name: &str) -> Result<(), BrewboxError> {
    if name.starts_with(RESERVED_PREFIX) {
        return Err(BrewboxError::ReservedPrefix(RESERVED_PREFIX.to_string()));
    }
    validate_identifier(name).map_err(|reason| BrewboxError::InvalidIdentifier {
        name: name.to_string(),
        reason,
    })
}

// ASCII alphanumerics joined by single '.', '_' or '-' separators.
fn validate_identifier(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("identifier must not be empty".to_string());
    }
    if name.len() > MAX_NAME_LEN {
        return Err(format!(
            "identifier is longer than {MAX_NAME_LEN} characters"
        ));
    }
    let mut previous_was_separator = true;
    for ch in name.chars() {
        let is_separator = matches!(ch, '.' | '_' | '-');
        if !ch.is_ascii_alphanumeric() && !is_separator {
            return Err(format!("character {ch:?} is not allowed"));
        }
        if is_separator && previous_was_separator {
            return Err(
                "identifier must start with an alphanumeric character and must not repeat separators"
                    .to_string(),
            );
        }
        previous_was_separator = is_separator;
    }
    if previous_was_separator {
        return Err("identifier must end with an alphanumeric character".to_string());
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct Naming {
    operator: String,
}

impl Naming {
    pub fn new(operator: impl Into<String>) -> Self {
        Self {
            operator: operator.into(),
        }
    }

    pub fn account_prefix(&self) -> String {
        format!("{RESERVED_PREFIX}{}_", self.operator)
    }

    pub fn account_for(&self, instance: &str) -> String {
        format!("{}{instance}", self.account_prefix())
    }

    pub fn instance_for(&self, account: &str) -> Option<String> {
        account
            .strip_prefix(&self.account_prefix())
            .map(str::to_string)
    }
}
