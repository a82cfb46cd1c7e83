use std::sync::Arc;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use tracing::{error, info, warn};
use uuid::Uuid;

use parley_db::Database;
use parley_types::api::{AuthResponse, LoginRequest, RegisterRequest, UserView};
use parley_types::models::Role;

use crate::auth::{AuthGate, Identity};
use crate::blocking;
use crate::convert::parse_id;
use crate::error::{ChatError, ChatResult};

const MIN_PASSWORD_LEN: usize = 8;

/// Registration and login. Issues tokens through the [`AuthGate`].
#[derive(Clone)]
pub struct AccountService {
    db: Arc<Database>,
    gate: AuthGate,
}

impl AccountService {
    pub fn new(db: Arc<Database>, gate: AuthGate) -> Self {
        Self { db, gate }
    }

    pub async fn register(&self, req: RegisterRequest) -> ChatResult<AuthResponse> {
        let username = req.username.trim().to_string();
        let email = req.email.trim().to_lowercase();

        if username.chars().count() < 3 || username.chars().count() > 32 {
            return Err(ChatError::Validation(
                "username must be between 3 and 32 characters".into(),
            ));
        }
        if !is_plausible_email(&email) {
            return Err(ChatError::Validation("email address is not valid".into()));
        }
        if req.password.len() < MIN_PASSWORD_LEN {
            return Err(ChatError::Validation(format!(
                "password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }

        // Argon2id is deliberately slow; keep it off the async runtime
        let password = req.password;
        let password_hash = tokio::task::spawn_blocking(move || {
            let salt = SaltString::generate(&mut OsRng);
            Argon2::default()
                .hash_password(password.as_bytes(), &salt)
                .map(|h| h.to_string())
        })
        .await
        .map_err(|e| ChatError::Internal(anyhow::anyhow!("hashing task failed: {}", e)))?
        .map_err(|e| {
            error!("Password hashing failed: {}", e);
            ChatError::Internal(anyhow::anyhow!("password hashing failed"))
        })?;

        let user_id = Uuid::new_v4();
        let (uid, uname, mail) = (user_id.to_string(), username.clone(), email.clone());
        let created = blocking(&self.db, move |db| {
            db.create_user(
                &uid,
                &uname,
                &mail,
                &password_hash,
                Role::User.as_str(),
                chrono::Utc::now(),
            )
        })
        .await?;

        if !created {
            warn!("Registration rejected, {} or {} already taken", username, email);
            return Err(ChatError::Validation(
                "username or email is already registered".into(),
            ));
        }

        info!("Registered user {} ({})", username, user_id);
        self.respond(Identity {
            id: user_id,
            username,
            role: Role::User,
        })
    }

    pub async fn login(&self, req: LoginRequest) -> ChatResult<AuthResponse> {
        let email = req.email.trim().to_lowercase();
        let user = blocking(&self.db, move |db| db.get_user_by_email(&email))
            .await?
            .ok_or(ChatError::InvalidCredential)?;

        let stored = user.password.clone();
        let password = req.password;
        let verified = tokio::task::spawn_blocking(move || {
            let parsed = PasswordHash::new(&stored).map_err(|e| anyhow::anyhow!("{}", e))?;
            Ok::<_, anyhow::Error>(
                Argon2::default()
                    .verify_password(password.as_bytes(), &parsed)
                    .is_ok(),
            )
        })
        .await
        .map_err(|e| ChatError::Internal(anyhow::anyhow!("hashing task failed: {}", e)))??;

        if !verified {
            return Err(ChatError::InvalidCredential);
        }

        let role = user.role.parse().unwrap_or_else(|e| {
            warn!("User {} has {}", user.id, e);
            Role::User
        });

        self.respond(Identity {
            id: parse_id(&user.id, "user id"),
            username: user.username,
            role,
        })
    }

    fn respond(&self, identity: Identity) -> ChatResult<AuthResponse> {
        let token = self.gate.issue(&identity)?;
        Ok(AuthResponse {
            token,
            user: UserView {
                id: identity.id,
                username: identity.username,
                role: identity.role,
            },
        })
    }
}

fn is_plausible_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && !domain.is_empty() && !domain.contains('@') && email.len() <= 254
        }
        None => false,
    }
}
