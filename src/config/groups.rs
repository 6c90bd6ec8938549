//! File group configuration.
//!
//! Each group becomes one `<name>-<timestamp>.tar.gz` archive.
//!
//! ```toml
//! [groups]
//! website = ["/var/www/html", "/etc/nginx/sites-enabled"]
//! mail = ["/var/mail"]
//! ```

use std::{collections::BTreeMap, path::PathBuf};

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Group name to ordered list of paths. Groups are processed in name order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupsConfig(pub BTreeMap<String, Vec<PathBuf>>);

impl GroupsConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for name in self.0.keys() {
            let valid = !name.is_empty()
                && name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
            if !valid {
                return Err(ConfigError::Validation(format!(
                    "group name {name:?} may only contain letters, digits, '-' and '_'"
                )));
            }
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<PathBuf>)> {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_path_like_names() {
        let mut groups = BTreeMap::new();
        groups.insert("../etc".to_string(), vec![PathBuf::from("/etc")]);
        assert!(GroupsConfig(groups).validate().is_err());
    }

    #[test]
    fn test_iterates_in_name_order() {
        let mut groups = BTreeMap::new();
        groups.insert("web".to_string(), vec![]);
        groups.insert("mail".to_string(), vec![]);
        let groups = GroupsConfig(groups);
        assert!(groups.validate().is_ok());
        let names: Vec<&String> = groups.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["mail", "web"]);
    }
}
