/// Router Module Index
///
/// Splits the portal's endpoints by the minimum access they need. The access gate in front
/// of the whole router enforces the session and staff requirements per path; handlers
/// repeat the role checks the gate cannot see (staff-only methods on protected paths).

/// Routes reachable without a session: health, landing, terms and the session flows.
pub mod public;

/// Routes that need a session. Row visibility depends on the caller's role.
pub mod authenticated;

/// Staff routes: client management, the admin dashboard and the privileged creation forms.
pub mod admin;
