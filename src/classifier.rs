//! Route classification.
//!
//! A static, ordered table of `(pattern, class)` pairs. Evaluation is first-match-wins and
//! every privileged pattern sits before every protected one, so the most restrictive class
//! applies when roots overlap (`/tickets/reply` under `/tickets`).

/// RouteClass
///
/// What the access gate requires before a path is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteClass {
    /// No session needed.
    Public,
    /// A session is needed.
    Protected,
    /// A session and at least the employee role are needed.
    Privileged,
}

impl RouteClass {
    pub fn requires_session(self) -> bool {
        matches!(self, RouteClass::Protected | RouteClass::Privileged)
    }
}

/// PathPattern
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathPattern {
    /// Matches the path exactly.
    Exact(&'static str),
    /// Matches the root itself or anything below it on a `/` boundary.
    Root(&'static str),
}

impl PathPattern {
    pub fn matches(self, path: &str) -> bool {
        match self {
            PathPattern::Exact(p) => path == p,
            PathPattern::Root(root) => path
                .strip_prefix(root)
                .is_some_and(|rest| rest.is_empty() || rest.starts_with('/')),
        }
    }
}

const PRIVILEGED_ROOTS: &[&str] = &[
    "/admin",
    "/clients",
    "/tickets/reply",
    "/quotes/new",
    "/services/new",
];

const PROTECTED_ROOTS: &[&str] = &["/dashboard", "/me", "/tickets", "/quotes", "/services"];

const PROTECTED_EXACT: &[&str] = &["/portal"];

const PUBLIC_EXACT: &[&str] = &["/", "/login", "/register", "/terms"];

const AUTH_FORM_ROOTS: &[&str] = &["/login", "/register"];

/// Paths the gate never sees: static and image assets, the terms page and the
/// provider's auth callbacks.
const BYPASS_ROOTS: &[&str] = &[
    "/_next/static",
    "/_next/image",
    "/static",
    "/images",
    "/api/auth",
    "/terms",
];

const BYPASS_EXACT: &[&str] = &["/favicon.ico", "/manifest.json"];

/// RouteTable
///
/// Immutable and shared by every request; all lookups are pure.
#[derive(Debug, Clone)]
pub struct RouteTable {
    rules: Vec<(PathPattern, RouteClass)>,
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::portal()
    }
}

impl RouteTable {
    /// The portal's route table.
    pub fn portal() -> Self {
        let rules = PRIVILEGED_ROOTS
            .iter()
            .map(|r| (PathPattern::Root(*r), RouteClass::Privileged))
            .chain(
                PROTECTED_ROOTS
                    .iter()
                    .map(|r| (PathPattern::Root(*r), RouteClass::Protected)),
            )
            .chain(
                PROTECTED_EXACT
                    .iter()
                    .map(|p| (PathPattern::Exact(*p), RouteClass::Protected)),
            )
            .chain(
                PUBLIC_EXACT
                    .iter()
                    .map(|p| (PathPattern::Exact(*p), RouteClass::Public)),
            )
            .collect();

        Self { rules }
    }

    /// classify
    ///
    /// Total: a path no rule matches is `Public`.
    pub fn classify(&self, path: &str) -> RouteClass {
        self.rules
            .iter()
            .find(|(pattern, _)| pattern.matches(path))
            .map(|(_, class)| *class)
            .unwrap_or(RouteClass::Public)
    }

    /// Login and registration forms, which signed-in users are sent away from.
    pub fn is_auth_form(&self, path: &str) -> bool {
        AUTH_FORM_ROOTS
            .iter()
            .any(|root| PathPattern::Root(*root).matches(path))
    }

    /// Whether the gate runs for this path at all.
    pub fn intercepts(&self, path: &str) -> bool {
        let bypassed = BYPASS_ROOTS
            .iter()
            .any(|root| PathPattern::Root(*root).matches(path))
            || BYPASS_EXACT.contains(&path);
        !bypassed
    }

    pub fn rules(&self) -> &[(PathPattern, RouteClass)] {
        &self.rules
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_exact_paths() {
        let table = RouteTable::portal();
        for path in ["/", "/login", "/register", "/terms"] {
            assert_eq!(table.classify(path), RouteClass::Public, "{path}");
        }
    }

    #[test]
    fn protected_roots_cover_nested_paths() {
        let table = RouteTable::portal();
        for path in [
            "/dashboard",
            "/tickets",
            "/tickets/8c7a",
            "/tickets/new",
            "/quotes/12",
            "/services/3/progress",
            "/portal",
            "/me",
        ] {
            assert_eq!(table.classify(path), RouteClass::Protected, "{path}");
        }
    }

    #[test]
    fn privileged_refines_protected() {
        let table = RouteTable::portal();
        for path in [
            "/admin",
            "/admin/invite-employee",
            "/clients",
            "/tickets/reply",
            "/tickets/reply/42",
            "/quotes/new",
            "/services/new",
        ] {
            assert_eq!(table.classify(path), RouteClass::Privileged, "{path}");
        }
    }

    #[test]
    fn roots_match_on_segment_boundaries() {
        let table = RouteTable::portal();
        assert_eq!(table.classify("/administrator"), RouteClass::Public);
        assert_eq!(table.classify("/dashboards"), RouteClass::Public);
        assert_eq!(table.classify("/quotes/newest"), RouteClass::Protected);
        assert_eq!(table.classify("/portal/x"), RouteClass::Public);
        assert_eq!(table.classify("/media"), RouteClass::Public);
    }

    #[test]
    fn unknown_paths_are_public() {
        let table = RouteTable::portal();
        assert_eq!(table.classify("/health"), RouteClass::Public);
        assert_eq!(table.classify(""), RouteClass::Public);
        assert_eq!(table.classify("no-leading-slash"), RouteClass::Public);
    }

    #[test]
    fn every_privileged_rule_precedes_every_protected_rule() {
        let table = RouteTable::portal();
        let last_privileged = table
            .rules()
            .iter()
            .rposition(|(_, c)| *c == RouteClass::Privileged)
            .unwrap();
        let first_protected = table
            .rules()
            .iter()
            .position(|(_, c)| *c == RouteClass::Protected)
            .unwrap();
        assert!(last_privileged < first_protected);
    }

    #[test]
    fn auth_forms() {
        let table = RouteTable::portal();
        assert!(table.is_auth_form("/login"));
        assert!(table.is_auth_form("/register"));
        assert!(table.is_auth_form("/login/recover"));
        assert!(!table.is_auth_form("/loginx"));
        assert!(!table.is_auth_form("/dashboard"));
    }

    #[test]
    fn interception_skips_assets() {
        let table = RouteTable::portal();
        assert!(!table.intercepts("/_next/static/chunk.js"));
        assert!(!table.intercepts("/images/logo.png"));
        assert!(!table.intercepts("/favicon.ico"));
        assert!(!table.intercepts("/terms"));
        assert!(!table.intercepts("/api/auth/callback"));
        assert!(table.intercepts("/api/admin/invite-employee"));
        assert!(table.intercepts("/admin"));
        assert!(table.intercepts("/"));
    }

    #[test]
    fn classification_is_stable_across_calls_and_tables() {
        let table = RouteTable::portal();
        let mut paths: Vec<&str> = PRIVILEGED_ROOTS
            .iter()
            .chain(PROTECTED_ROOTS)
            .chain(PROTECTED_EXACT)
            .chain(PUBLIC_EXACT)
            .copied()
            .collect();
        paths.extend(["", "/tickets/reply/x", "/administrator", "/quotes/newest", "/unknown"]);

        for path in paths {
            let first = table.classify(path);
            assert_eq!(table.classify(path), first, "{path}");
            assert_eq!(RouteTable::portal().classify(path), first, "{path}");
        }
    }
}
