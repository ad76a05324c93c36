//! Server capabilities and authentication modes discovered from EHLO.

use std::collections::HashSet;

/// A server capability advertised in an EHLO reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Capability {
    /// PIPELINING - command pipelining (RFC 2920)
    Pipelining,
    /// STARTTLS - in-band TLS upgrade (RFC 3207)
    StartTls,
    /// AUTH - authentication (RFC 4954)
    Auth,
    /// 8BITMIME - 8-bit MIME transport (RFC 6152)
    EightBitMime,
    /// SIZE - message size declaration (RFC 1870)
    Size,
    /// ENHANCEDSTATUSCODES - enhanced status codes (RFC 2034)
    EnhancedStatusCodes,
    /// BURL - remote content submission (RFC 4468)
    Burl,
}

impl Capability {
    /// Parses a capability keyword, case-insensitively.
    ///
    /// Returns `None` for keywords the engine does not track.
    #[must_use]
    pub fn parse(keyword: &str) -> Option<Self> {
        match keyword.to_uppercase().as_str() {
            "PIPELINING" => Some(Self::Pipelining),
            "STARTTLS" => Some(Self::StartTls),
            "AUTH" => Some(Self::Auth),
            "8BITMIME" => Some(Self::EightBitMime),
            "SIZE" => Some(Self::Size),
            "ENHANCEDSTATUSCODES" => Some(Self::EnhancedStatusCodes),
            "BURL" => Some(Self::Burl),
            _ => None,
        }
    }

    /// Returns the canonical keyword for this capability.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pipelining => "PIPELINING",
            Self::StartTls => "STARTTLS",
            Self::Auth => "AUTH",
            Self::EightBitMime => "8BITMIME",
            Self::Size => "SIZE",
            Self::EnhancedStatusCodes => "ENHANCEDSTATUSCODES",
            Self::Burl => "BURL",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The set of capabilities advertised by the server.
///
/// The set is replaced wholesale on every EHLO; capabilities never persist
/// across a reconnect or a STARTTLS upgrade.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilitySet(HashSet<Capability>);

impl CapabilitySet {
    /// Creates an empty capability set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the capability is advertised.
    #[must_use]
    pub fn contains(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    /// Adds a capability to the set.
    pub fn insert(&mut self, capability: Capability) {
        self.0.insert(capability);
    }

    /// Removes every capability.
    pub fn clear(&mut self) {
        self.0.clear();
    }

    /// Returns true if no capabilities are advertised.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the number of advertised capabilities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterates over the advertised capabilities in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Extend<Capability> for CapabilitySet {
    fn extend<I: IntoIterator<Item = Capability>>(&mut self, iter: I) {
        self.0.extend(iter);
    }
}

impl std::fmt::Display for CapabilitySet {
    /// Formats the set as sorted, space-separated canonical keywords.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut capabilities: Vec<Capability> = self.0.iter().copied().collect();
        capabilities.sort_unstable();
        let mut first = true;
        for capability in capabilities {
            if !first {
                f.write_str(" ")?;
            }
            first = false;
            f.write_str(capability.as_str())?;
        }
        Ok(())
    }
}

/// SASL authentication mechanism advertised by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthMechanism {
    /// PLAIN - single base64 `\0user\0password` answer
    Plain,
    /// LOGIN - legacy two-step username/password exchange
    Login,
}

impl AuthMechanism {
    /// Parses an authentication mechanism name, case-insensitively.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PLAIN" => Some(Self::Plain),
            "LOGIN" => Some(Self::Login),
            _ => None,
        }
    }

    /// Returns the mechanism name as a string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "PLAIN",
            Self::Login => "LOGIN",
        }
    }
}

impl std::fmt::Display for AuthMechanism {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authentication mode requested by the caller.
///
/// `Any` is resolved to a concrete mechanism when the operation is
/// dispatched: PLAIN if advertised, otherwise LOGIN if advertised,
/// otherwise the operation fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// Let the engine pick from the advertised mechanisms.
    Any,
    /// Force AUTH PLAIN.
    Plain,
    /// Force AUTH LOGIN.
    Login,
}

/// Capabilities and authentication mechanisms parsed from one EHLO reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EhloInfo {
    /// Advertised capabilities.
    pub capabilities: CapabilitySet,
    /// Mechanisms listed after the AUTH keyword.
    pub auth_mechanisms: HashSet<AuthMechanism>,
}

/// Parses the lines of an EHLO success reply.
///
/// The first line is the server greeting and carries no capability; each
/// following line is an option keyword with optional parameters. Keywords
/// the engine does not recognize are ignored. For AUTH, every remaining
/// whitespace-separated token names a mechanism and the recognized subset
/// is collected.
#[must_use]
pub fn parse_ehlo(lines: &[String]) -> EhloInfo {
    let mut info = EhloInfo::default();

    for line in lines.iter().skip(1) {
        let mut tokens = line.split_whitespace();
        let Some(keyword) = tokens.next() else {
            continue;
        };
        let Some(capability) = Capability::parse(keyword) else {
            tracing::trace!(keyword, "ignoring unrecognized EHLO option");
            continue;
        };
        info.capabilities.insert(capability);
        if capability == Capability::Auth {
            info.auth_mechanisms
                .extend(tokens.filter_map(AuthMechanism::parse));
        }
    }

    info
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| (*s).to_string()).collect()
    }

    mod capability_parse_tests {
        use super::*;

        #[test]
        fn parse_known_keywords() {
            assert_eq!(Capability::parse("STARTTLS"), Some(Capability::StartTls));
            assert_eq!(Capability::parse("PIPELINING"), Some(Capability::Pipelining));
            assert_eq!(Capability::parse("AUTH"), Some(Capability::Auth));
            assert_eq!(Capability::parse("8BITMIME"), Some(Capability::EightBitMime));
            assert_eq!(Capability::parse("SIZE"), Some(Capability::Size));
            assert_eq!(
                Capability::parse("ENHANCEDSTATUSCODES"),
                Some(Capability::EnhancedStatusCodes)
            );
            assert_eq!(Capability::parse("BURL"), Some(Capability::Burl));
        }

        #[test]
        fn parse_is_case_insensitive() {
            assert_eq!(Capability::parse("starttls"), Some(Capability::StartTls));
            assert_eq!(Capability::parse("Pipelining"), Some(Capability::Pipelining));
        }

        #[test]
        fn parse_unknown() {
            assert_eq!(Capability::parse("CHUNKING"), None);
            assert_eq!(Capability::parse(""), None);
        }
    }

    mod auth_mechanism_tests {
        use super::*;

        #[test]
        fn parse_plain_and_login() {
            assert_eq!(AuthMechanism::parse("PLAIN"), Some(AuthMechanism::Plain));
            assert_eq!(AuthMechanism::parse("plain"), Some(AuthMechanism::Plain));
            assert_eq!(AuthMechanism::parse("LOGIN"), Some(AuthMechanism::Login));
        }

        #[test]
        fn parse_unsupported() {
            assert_eq!(AuthMechanism::parse("CRAM-MD5"), None);
            assert_eq!(AuthMechanism::parse("XOAUTH2"), None);
        }
    }

    mod parse_ehlo_tests {
        use super::*;

        #[test]
        fn greeting_line_carries_no_capability() {
            // A greeting that happens to start with a keyword must not count.
            let info = parse_ehlo(&lines(&["STARTTLS.example.com greets you"]));
            assert!(info.capabilities.is_empty());
        }

        #[test]
        fn collects_capabilities_and_auth_mechanisms() {
            let info = parse_ehlo(&lines(&[
                "mx.example.com",
                "PIPELINING",
                "SIZE 52428800",
                "AUTH PLAIN LOGIN CRAM-MD5",
                "STARTTLS",
            ]));
            assert!(info.capabilities.contains(Capability::Pipelining));
            assert!(info.capabilities.contains(Capability::Size));
            assert!(info.capabilities.contains(Capability::Auth));
            assert!(info.capabilities.contains(Capability::StartTls));
            assert_eq!(info.capabilities.len(), 4);
            assert_eq!(
                info.auth_mechanisms,
                [AuthMechanism::Plain, AuthMechanism::Login].into()
            );
        }

        #[test]
        fn unknown_keywords_are_ignored() {
            let info = parse_ehlo(&lines(&["mx", "DSN", "CHUNKING", "8BITMIME"]));
            assert_eq!(info.capabilities.len(), 1);
            assert!(info.capabilities.contains(Capability::EightBitMime));
        }

        #[test]
        fn lowercase_options_are_recognized() {
            let info = parse_ehlo(&lines(&["mx", "burl imap", "auth login"]));
            assert!(info.capabilities.contains(Capability::Burl));
            assert!(info.capabilities.contains(Capability::Auth));
            assert_eq!(info.auth_mechanisms, [AuthMechanism::Login].into());
        }

        #[test]
        fn round_trips_through_canonical_form() {
            let info = parse_ehlo(&lines(&[
                "mx",
                "STARTTLS",
                "PIPELINING",
                "AUTH PLAIN",
                "BURL",
            ]));
            // parse ∘ format ∘ parse = parse
            let formatted = info.capabilities.to_string();
            let mut relines = vec!["mx".to_string()];
            relines.extend(formatted.split(' ').map(str::to_string));
            let reparsed = parse_ehlo(&relines);
            assert_eq!(reparsed.capabilities, info.capabilities);
        }

        #[test]
        fn canonical_form_is_sorted() {
            let set: CapabilitySet = [Capability::StartTls, Capability::Pipelining]
                .into_iter()
                .collect();
            assert_eq!(set.to_string(), "PIPELINING STARTTLS");
        }
    }
}
