use crate::config::Package;

/// Licence comment placed at the top of every generated stylesheet and
/// script. It only depends on package metadata, so it stays byte-identical
/// across builds of the same version.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Banner(String);

impl Banner {
    pub fn new(package: &Package) -> Self {
        Self(format!(
            "/*!\n * {} - {}\n * @version v{}\n * @link {}\n * @license {}\n */\n",
            package.name, package.description, package.version, package.homepage, package.license
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Number of lines the banner occupies, used to shift source maps.
    pub fn lines(&self) -> usize {
        self.0.matches('\n').count()
    }

    /// The banner followed by `body`.
    pub fn wrap(&self, body: &str) -> String {
        let mut out = String::with_capacity(self.0.len() + body.len());
        out.push_str(&self.0);
        out.push_str(body);
        out
    }
}
