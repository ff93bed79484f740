pub mod history;
pub mod init;
pub mod list_models;
pub mod seed;
pub mod serve;
pub mod start;
pub mod submit;

use anyhow::{Context, Result};

use dyscreen_core::model::User;
use dyscreen_core::traits::{Identity, UserDirectory};

/// Register (or look up) a user known only by subject, as the shell
/// commands do not go through an identity provider.
pub(crate) async fn register_local_user(users: &dyn UserDirectory, subject: &str) -> Result<User> {
    let identity = Identity {
        subject: subject.to_string(),
        email: String::new(),
        name: subject.to_string(),
        picture_url: None,
    };
    users
        .find_or_create(&identity)
        .await
        .with_context(|| format!("failed to register user '{subject}'"))
}

/// Look up an existing user by subject.
pub(crate) async fn existing_user(users: &dyn UserDirectory, subject: &str) -> Result<User> {
    users
        .find_by_subject(subject)
        .await
        .with_context(|| format!("failed to look up user '{subject}'"))?
        .with_context(|| {
            format!("unknown user '{subject}'; run `dyscreen start --user {subject}` first")
        })
}
