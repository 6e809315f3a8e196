//! Route table and access guards.

use std::fmt;

use marketstall_core::Role;

use crate::auth::AuthStatus;

/// Top-level routes of the storefront.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    Home,
    Auth,
    Cart,
    Checkout,
    Products,
    Profile,
    Admin,
    Seller,
    Search,
    Info,
}

impl Route {
    pub const ALL: [Self; 10] = [
        Self::Home,
        Self::Auth,
        Self::Cart,
        Self::Checkout,
        Self::Products,
        Self::Profile,
        Self::Admin,
        Self::Seller,
        Self::Search,
        Self::Info,
    ];

    #[must_use]
    pub const fn path(self) -> &'static str {
        match self {
            Self::Home => "/",
            Self::Auth => "/auth",
            Self::Cart => "/cart",
            Self::Checkout => "/checkout",
            Self::Products => "/products",
            Self::Profile => "/profile",
            Self::Admin => "/admin",
            Self::Seller => "/seller",
            Self::Search => "/search",
            Self::Info => "/info",
        }
    }

    /// Route owning `path`. Nested paths (`/products/42`) resolve to their
    /// top-level route; query and fragment are ignored.
    #[must_use]
    pub fn from_path(path: &str) -> Option<Self> {
        let path = path.split(['?', '#']).next().unwrap_or_default();
        let first = path.trim_start_matches('/').split('/').next().unwrap_or_default();
        if first.is_empty() {
            return Some(Self::Home);
        }
        Self::ALL
            .into_iter()
            .find(|route| route.path().trim_start_matches('/') == first)
    }

    /// Role required to enter, if any.
    #[must_use]
    pub const fn required_role(self) -> Option<Role> {
        match self {
            Self::Admin => Some(Role::Admin),
            Self::Seller => Some(Role::Seller),
            _ => None,
        }
    }

    /// Whether the route needs a session.
    #[must_use]
    pub const fn requires_login(self) -> bool {
        matches!(
            self,
            Self::Checkout | Self::Profile | Self::Admin | Self::Seller
        )
    }

    /// Whether logged-in users are sent away from this route.
    #[must_use]
    pub const fn guest_only(self) -> bool {
        matches!(self, Self::Auth)
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// Outcome of a guard check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    Allow,
    /// Send the visitor to `/auth`, then back to `return_to`.
    RedirectToLogin { return_to: String },
    /// Logged in users do not see the login page.
    RedirectHome,
    /// Logged in without the required role.
    Forbidden,
}

/// Decide whether `status` may enter `route`.
///
/// `requested` is the full path asked for and becomes the post-login return
/// target.
#[must_use]
pub fn guard(route: Route, requested: &str, status: &AuthStatus) -> GuardDecision {
    if route.guest_only() {
        return if status.logged_in {
            GuardDecision::RedirectHome
        } else {
            GuardDecision::Allow
        };
    }
    if route.requires_login() && !status.logged_in {
        return GuardDecision::RedirectToLogin {
            return_to: requested.to_string(),
        };
    }
    match route.required_role() {
        Some(required) if status.role != Some(required) => GuardDecision::Forbidden,
        _ => GuardDecision::Allow,
    }
}
