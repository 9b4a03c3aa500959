//! Routing table (HAProxy backend map) loading.
//!
//! The backend map is a line-oriented file mapping domain names to backend
//! identifiers:
//!
//! ```text
//! # domain              backend
//! www.example.com       web
//! api.example.com       api
//! ```
//!
//! Blank lines and `#` comments are ignored. Each remaining line is split on
//! its first whitespace run: the left side is the domain, the remainder is the
//! backend identifier. Domain names are compared in their canonical form:
//! ASCII lowercase without a trailing root dot.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, trace, warn};

use crate::error::ConfigError;

/// Names of every domain routed during the current run.
pub type ActiveDomainSet = BTreeSet<String>;

/// Canonical form of a DNS name: ASCII lowercase, trailing `.` removed.
pub fn normalize_domain(name: &str) -> String {
    name.trim_end_matches('.').to_ascii_lowercase()
}

/// A routed domain and the backend serving it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Domain {
    pub name: String,
    pub backend_id: String,
}

impl Domain {
    /// `name` is stored in canonical form, see [`normalize_domain`].
    pub fn new(name: impl AsRef<str>, backend_id: impl Into<String>) -> Self {
        Self {
            name: normalize_domain(name.as_ref()),
            backend_id: backend_id.into(),
        }
    }
}

/// Ordered set of routed domains, unique by name.
///
/// Iteration follows the order in which each name first appears in the
/// routing table. When a name is listed twice, the later backend wins and a
/// warning is logged.
#[derive(Debug, Clone, Default)]
pub struct DomainRegistry {
    domains: Vec<Domain>,
}

impl DomainRegistry {
    /// Load the routing table at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read and
    /// [`ConfigError::MalformedRoute`] for a non-comment line without a
    /// whitespace separator.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))?;
        let registry = Self::parse(path, &content)?;

        debug!(
            path = %path.display(),
            domain_count = registry.len(),
            "Loaded routing table"
        );

        Ok(registry)
    }

    /// Parse routing table text. `source` is only used in error messages.
    pub fn parse(source: &Path, content: &str) -> Result<Self, ConfigError> {
        let mut domains: Vec<Domain> = Vec::new();
        let mut seen: HashMap<String, (usize, usize)> = HashMap::new();

        for (idx, raw) in content.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((name, backend)) = line.split_once(char::is_whitespace) else {
                return Err(ConfigError::MalformedRoute {
                    path: PathBuf::from(source),
                    line: line_no,
                    content: line.to_string(),
                });
            };
            let backend = backend.trim_start();
            let name = normalize_domain(name);

            trace!(domain = %name, backend = %backend, line = line_no, "Parsed route");

            match seen.get_mut(&name) {
                Some((slot, first_line)) => {
                    let previous = &mut domains[*slot];
                    warn!(
                        domain = %name,
                        previous_backend = %previous.backend_id,
                        previous_line = *first_line,
                        backend = %backend,
                        line = line_no,
                        "Domain listed more than once in routing table, keeping the last entry"
                    );
                    previous.backend_id = backend.to_string();
                    *first_line = line_no;
                }
                None => {
                    seen.insert(name.clone(), (domains.len(), line_no));
                    domains.push(Domain::new(name, backend));
                }
            }
        }

        Ok(Self { domains })
    }

    /// Build a registry from already-parsed domains, applying the same
    /// keep-last rule as [`DomainRegistry::parse`].
    pub fn from_domains(domains: impl IntoIterator<Item = Domain>) -> Self {
        let mut registry = Self::default();
        for domain in domains {
            match registry.domains.iter_mut().find(|d| d.name == domain.name) {
                Some(existing) => existing.backend_id = domain.backend_id,
                None => registry.domains.push(domain),
            }
        }
        registry
    }

    pub fn domains(&self) -> &[Domain] {
        &self.domains
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Domain> {
        self.domains.iter()
    }

    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    /// Backend identifier routed for `name`, if any.
    pub fn backend_of(&self, name: &str) -> Option<&str> {
        let name = normalize_domain(name);
        self.domains
            .iter()
            .find(|d| d.name == name)
            .map(|d| d.backend_id.as_str())
    }

    /// The set of routed domain names.
    pub fn active_names(&self) -> ActiveDomainSet {
        self.domains.iter().map(|d| d.name.clone()).collect()
    }
}

impl<'a> IntoIterator for &'a DomainRegistry {
    type Item = &'a Domain;
    type IntoIter = std::slice::Iter<'a, Domain>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn parse(content: &str) -> Result<DomainRegistry, ConfigError> {
        DomainRegistry::parse(Path::new("backends.map"), content)
    }

    #[test]
    fn test_parse_skips_comments_and_blank_lines() {
        let registry = parse(
            "# routed domains\n\
             \n\
             a.example   b1\n\
             \t# indented comment\n\
             b.example\tb2\n",
        )
        .unwrap();

        assert_eq!(
            registry.domains(),
            &[Domain::new("a.example", "b1"), Domain::new("b.example", "b2")]
        );
    }

    #[test]
    fn test_parse_keeps_remainder_as_backend() {
        let registry = parse("a.example    web   extra  \n").unwrap();
        assert_eq!(registry.backend_of("a.example"), Some("web   extra"));
    }

    #[test]
    fn test_parse_rejects_line_without_separator() {
        let err = parse("a.example b1\nlonely.example\n").unwrap_err();
        match err {
            ConfigError::MalformedRoute { line, content, .. } => {
                assert_eq!(line, 2);
                assert_eq!(content, "lonely.example");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_duplicate_domain_keeps_last_backend_and_first_position() {
        let registry = parse("a.example b1\nc.example b3\na.example b2\n").unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.domains()[0], Domain::new("a.example", "b2"));
        assert_eq!(registry.domains()[1], Domain::new("c.example", "b3"));
    }

    #[test]
    fn test_active_names() {
        let registry = parse("a.example b1\nb.example b1\n").unwrap();
        let names = registry.active_names();
        assert!(names.contains("a.example"));
        assert!(names.contains("b.example"));
        assert_eq!(names.len(), 2);
    }

    #[test]
    fn test_names_are_canonicalized() {
        let registry = parse("WWW.Example.com web\napi.example.com. api\nwww.example.com web2\n").unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.domains(),
            &[Domain::new("www.example.com", "web2"), Domain::new("api.example.com", "api")]
        );
        assert_eq!(registry.backend_of("Api.Example.Com."), Some("api"));
        assert_eq!(
            registry.active_names().into_iter().collect::<Vec<_>>(),
            vec!["api.example.com".to_string(), "www.example.com".to_string()]
        );
    }

    #[test]
    fn test_normalize_domain() {
        assert_eq!(normalize_domain("WWW.Example.COM."), "www.example.com");
        assert_eq!(normalize_domain("*.Example.com"), "*.example.com");
        assert_eq!(normalize_domain("a.example"), "a.example");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "www.example.com web").unwrap();

        let registry = DomainRegistry::load(file.path()).unwrap();
        assert_eq!(registry.backend_of("www.example.com"), Some("web"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = DomainRegistry::load("/nonexistent/backends.map").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        assert!(err.to_string().contains("/nonexistent/backends.map"));
    }

    #[test]
    fn test_from_domains_applies_keep_last() {
        let registry = DomainRegistry::from_domains([
            Domain::new("a.example", "b1"),
            Domain::new("a.example", "b2"),
        ]);
        assert_eq!(registry.domains(), &[Domain::new("a.example", "b2")]);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn every_routed_line_is_registered(
                routes in proptest::collection::vec(("[a-z]{1,8}\\.example", "[a-z0-9]{1,6}"), 0..20)
            ) {
                let content: String = routes
                    .iter()
                    .map(|(d, b)| format!("{d} {b}\n"))
                    .collect();
                let registry = parse(&content).unwrap();

                for (domain, _) in &routes {
                    prop_assert!(registry.active_names().contains(domain));
                }
                // Last occurrence of each name determines its backend
                for domain in registry.iter() {
                    let expected = routes
                        .iter()
                        .rev()
                        .find(|(d, _)| d == &domain.name)
                        .map(|(_, b)| b.as_str());
                    prop_assert_eq!(Some(domain.backend_id.as_str()), expected);
                }
            }
        }
    }
}
