use std::collections::BTreeSet;

use super::error::SchemaError;

/// Language codes that multilingual fields are expanded into
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Languages(BTreeSet<String>);

impl Languages {
    pub fn new<I, T>(codes: I) -> Result<Self, SchemaError>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let mut set = BTreeSet::new();
        for code in codes {
            let code = code.into();
            if code.is_empty() || !code.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
                return Err(SchemaError::InvalidLanguages(format!("invalid language code '{}'", code)));
            }
            set.insert(code);
        }
        if set.is_empty() {
            return Err(SchemaError::InvalidLanguages("at least one language is required".to_string()));
        }
        Ok(Self(set))
    }

    pub fn contains(&self, code: &str) -> bool {
        self.0.contains(code)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl Default for Languages {
    fn default() -> Self {
        Self(BTreeSet::from(["en".to_string()]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_codes() {
        let languages = Languages::new(["en", "fr", "pt-BR"]).unwrap();
        assert!(languages.contains("pt-BR"));
        assert_eq!(languages.iter().count(), 3);
        assert!(Languages::new(Vec::<String>::new()).is_err());
        assert!(Languages::new(["e n"]).is_err());
    }
}
