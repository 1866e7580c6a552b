//! Contact directory snapshot given to the model.

use std::sync::RwLock;

use crate::transport::Contact;

#[derive(Default)]
pub struct ContactDirectory {
    contacts: RwLock<Vec<Contact>>,
}

impl ContactDirectory {
    pub fn new(contacts: Vec<Contact>) -> Self {
        Self {
            contacts: RwLock::new(contacts),
        }
    }

    /// Replace the snapshot, e.g. after the transport reconnects.
    pub fn refresh(&self, contacts: Vec<Contact>) {
        tracing::debug!(count = contacts.len(), "Contact directory refreshed");
        *self.contacts.write().unwrap_or_else(|p| p.into_inner()) = contacts;
    }

    pub fn len(&self) -> usize {
        self.contacts.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Compact JSON array of `{name, number}`.
    pub fn to_json(&self) -> String {
        let contacts = self.contacts.read().unwrap_or_else(|p| p.into_inner());
        serde_json::to_string(&*contacts).unwrap_or_else(|_| "[]".to_string())
    }

    pub fn contains(&self, number: &str) -> bool {
        let number = number.trim();
        !number.is_empty()
            && self
                .contacts
                .read()
                .unwrap_or_else(|p| p.into_inner())
                .iter()
                .any(|c| c.number == number)
    }

    /// Case-insensitive substring match on name or number.
    pub fn search(&self, query: &str) -> Vec<Contact> {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return Vec::new();
        }
        self.contacts
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .filter(|c| {
                c.name.to_lowercase().contains(&query) || c.number.to_lowercase().contains(&query)
            })
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory() -> ContactDirectory {
        ContactDirectory::new(vec![
            Contact {
                name: "Ana Lopez".to_string(),
                number: "12345@domain".to_string(),
            },
            Contact {
                name: "Dentist".to_string(),
                number: "99999@domain".to_string(),
            },
        ])
    }

    #[test]
    fn test_contains_exact_number_only() {
        let dir = directory();
        assert!(dir.contains("12345@domain"));
        assert!(!dir.contains("12345"));
        assert!(!dir.contains(""));
    }

    #[test]
    fn test_search() {
        let dir = directory();
        assert_eq!(dir.search("ana")[0].number, "12345@domain");
        assert_eq!(dir.search("999").len(), 1);
        assert_eq!(dir.search("domain").len(), 2);
        assert!(dir.search("   ").is_empty());
    }

    #[test]
    fn test_json_shape() {
        let dir = directory();
        let json = dir.to_json();
        assert!(json.contains(r#""number":"12345@domain""#));
        dir.refresh(Vec::new());
        assert_eq!(dir.to_json(), "[]");
    }
}
