//! Login, registration and session inspection.

use marketstall_client::Storefront;
use marketstall_client::api::{Credentials, RegisterRequest};
use marketstall_client::auth::AuthError;
use marketstall_client::error::ClientError;
use marketstall_core::{Email, Role};
use secrecy::SecretString;

use super::CommandError;
use crate::output;

/// Log in, then report what the hand-over left in the cart and favorites.
///
/// A failed favorites sync is reported but does not undo the login.
pub async fn login(app: &Storefront, email: &str, password: String) -> Result<(), CommandError> {
    let credentials = Credentials {
        email: Email::parse(email).map_err(AuthError::from)?,
        password: SecretString::from(password),
    };

    match app.login(&credentials).await {
        Ok(session) => {
            let name = session
                .username
                .or(session.email)
                .unwrap_or_else(|| credentials.email.to_string());
            output::line(&format!("Logged in as {name}"));
        }
        Err(ClientError::Reconcile(e)) => {
            ClientError::from(e).report();
            output::line("Logged in, but some favorites could not be synced.");
        }
        Err(e) => return Err(e.into()),
    }

    output::line(&format!(
        "Cart: {} item(s), favorites: {}",
        app.cart().item_count(),
        app.favorites().count()
    ));
    Ok(())
}

pub async fn register(
    app: &Storefront,
    username: String,
    email: &str,
    password: String,
    role: &str,
) -> Result<(), CommandError> {
    let role: Role = role.parse()?;
    if role == Role::Admin {
        return Err(CommandError::RestrictedRole);
    }

    let request = RegisterRequest {
        username,
        email: Email::parse(email).map_err(AuthError::from)?,
        password: SecretString::from(password),
        role,
    };
    app.auth().register(&request).await?;
    output::line("Account created. Log in to continue.");
    Ok(())
}

pub async fn logout(app: &Storefront) {
    let was_logged_in = app.auth().is_authenticated();
    app.logout().await;
    if was_logged_in {
        output::line("Logged out.");
    } else {
        output::line("Not logged in.");
    }
}

/// Show the session, preferring the backend profile over what was stored at
/// login.
pub async fn whoami(app: &Storefront) {
    let status = app.auth().status();
    if !status.logged_in {
        output::line("Browsing as a guest.");
        return;
    }

    match app.profile().await {
        Ok(Some(profile)) => {
            output::line(&format!(
                "{} <{}> ({})",
                profile.username,
                profile.email,
                profile.role.as_str()
            ));
            if let Some(account_status) = profile.account_status {
                output::line(&format!("Account status: {account_status}"));
            }
            return;
        }
        Ok(None) => {}
        Err(e) => ClientError::from(e).report(),
    }

    let session = app.auth().tokens().get();
    let name = session
        .username
        .or(session.email)
        .unwrap_or_else(|| "unknown user".to_string());
    let role = status.role.map_or("no role", |role| role.as_str());
    output::line(&format!("{name} ({role})"));
    if let Some(account_status) = status.account_status {
        output::line(&format!("Account status: {account_status}"));
    }
}
