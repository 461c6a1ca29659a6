use url::form_urlencoded;

/// Attaches the upstream API credential to outbound query strings.
#[derive(Debug, Clone)]
pub struct CredentialInjector {
    param: String,
    secret: String,
}

impl CredentialInjector {
    pub fn new(param: String, secret: String) -> Self {
        Self { param, secret }
    }

    /// Return `query` with the credential parameter appended, unless it already carries one.
    ///
    /// `query` is either empty or a query string including its leading `?`.
    pub fn augment(&self, query: &str) -> String {
        if self.has_credential(query) {
            return query.to_owned();
        }
        let separator = if query.is_empty() { "?" } else { "&" };
        format!("{query}{separator}{}={}", self.param, self.secret)
    }

    fn has_credential(&self, query: &str) -> bool {
        let pairs = query.strip_prefix('?').unwrap_or(query);
        form_urlencoded::parse(pairs.as_bytes()).any(|(name, _)| name == self.param.as_str())
    }
}
