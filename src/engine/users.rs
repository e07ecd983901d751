use ulid::Ulid;

use crate::auth::{Action, Resource, require};
use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::store::email_key;
use super::{Engine, EngineError, RequestContext};

/// Role changes the directory accepts. Promotion to admin is further
/// restricted to admin actors by authorization.
pub fn role_transition_allowed(from: Role, to: Role) -> bool {
    use Role::*;
    matches!(
        (from, to),
        (Guest, Host) | (Host, Guest) | (Host, Admin) | (Admin, Host) | (Admin, Guest)
    )
}

fn validate_email(email: &str) -> Result<(), EngineError> {
    let email = email.trim();
    if email.len() > MAX_EMAIL_LEN {
        return Err(EngineError::LimitExceeded("email too long"));
    }
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') && !domain.starts_with('.') => Ok(()),
        _ => Err(EngineError::InvalidInput(format!("malformed email {email:?}"))),
    }
}

fn validate_phone(phone: Option<&str>) -> Result<(), EngineError> {
    let Some(phone) = phone else { return Ok(()) };
    if phone.len() > MAX_PHONE_LEN {
        return Err(EngineError::LimitExceeded("phone too long"));
    }
    let digits = phone.strip_prefix('+').unwrap_or(phone);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit() || c == ' ' || c == '-') {
        return Err(EngineError::InvalidInput(format!("malformed phone {phone:?}")));
    }
    Ok(())
}

impl Engine {
    /// Self-service sign-up as guest or host. The verification mail goes out
    /// in the background; a failed send is logged and never fails registration.
    pub async fn register_user(
        &self,
        ctx: &RequestContext,
        email: &str,
        phone: Option<String>,
        role: Role,
    ) -> Result<User, EngineError> {
        if role == Role::Admin {
            return Err(EngineError::InvalidInput("cannot self-register as admin".into()));
        }
        let user = self.create_user(ctx, email, phone, role).await?;
        self.dispatch_verification(&user);
        Ok(user)
    }

    /// Ensure an admin account exists for `email`. Existing accounts are returned as they are.
    pub async fn bootstrap_admin(
        &self,
        ctx: &RequestContext,
        email: &str,
    ) -> Result<User, EngineError> {
        if let Some(id) = self.store.user_by_email(email) {
            let existing = self.load_user(ctx, &id).await?;
            if existing.role != Role::Admin {
                tracing::warn!(user_id = %id, role = %existing.role, "bootstrap email belongs to a non-admin");
            }
            return Ok(existing);
        }
        let user = self.create_user(ctx, email, None, Role::Admin).await?;
        tracing::info!(user_id = %user.id, "admin account bootstrapped");
        Ok(user)
    }

    async fn create_user(
        &self,
        ctx: &RequestContext,
        email: &str,
        phone: Option<String>,
        role: Role,
    ) -> Result<User, EngineError> {
        validate_email(email)?;
        validate_phone(phone.as_deref())?;
        if self.store.user_count() >= MAX_USERS {
            return Err(EngineError::LimitExceeded("too many users"));
        }
        ctx.check()?;

        let user = User {
            id: Ulid::new(),
            email: email.trim().to_string(),
            phone,
            role,
            banned: false,
            created_at: self.clock.now(),
        };
        self.commit_new_user(user.clone()).await?;
        tracing::info!(user_id = %user.id, %role, "user registered");
        Ok(user)
    }

    fn dispatch_verification(&self, user: &User) {
        let mailer = self.mailer.clone();
        let email = user.email.clone();
        let user_id = user.id;
        tokio::spawn(async move {
            if let Err(e) = mailer.send_verification(&email, user_id).await {
                metrics::counter!(observability::MAIL_FAILURES_TOTAL).increment(1);
                tracing::warn!(%user_id, "verification mail failed: {e}");
            }
        });
    }

    pub async fn get_user(
        &self,
        ctx: &RequestContext,
        actor: &ActingUser,
        id: Ulid,
    ) -> Result<User, EngineError> {
        let user = self.load_user(ctx, &id).await?;
        require(actor, Resource::User(&user), Action::View, "cannot view this user")?;
        Ok(user)
    }

    pub async fn find_user_by_email(
        &self,
        ctx: &RequestContext,
        actor: &ActingUser,
        email: &str,
    ) -> Result<Option<User>, EngineError> {
        let Some(id) = self.store.user_by_email(email) else {
            return Ok(None);
        };
        let user = self.load_user(ctx, &id).await?;
        require(actor, Resource::User(&user), Action::View, "cannot view this user")?;
        Ok(Some(user))
    }

    /// Replace contact details. A new email must not belong to anyone else.
    pub async fn update_user(
        &self,
        ctx: &RequestContext,
        actor: &ActingUser,
        id: Ulid,
        email: &str,
        phone: Option<String>,
    ) -> Result<User, EngineError> {
        validate_email(email)?;
        validate_phone(phone.as_deref())?;
        self.check_actor(ctx, actor).await?;
        let guard = self.user_write(ctx, &id).await?;
        require(actor, Resource::User(&*guard), Action::Update, "cannot edit this user")?;

        let email = email.trim().to_string();
        let changes_email = email_key(&email) != email_key(&guard.email);
        if changes_email && !self.store.reserve_email(&email, id) {
            return Err(EngineError::AlreadyExists(email_key(&email)));
        }
        let event = Event::UserUpdated { id, email, phone };
        let guard = self.commit_user_event(guard, event).await?;
        Ok(guard.clone())
    }

    pub async fn change_role(
        &self,
        ctx: &RequestContext,
        actor: &ActingUser,
        id: Ulid,
        to: Role,
    ) -> Result<User, EngineError> {
        self.check_actor(ctx, actor).await?;
        let guard = self.user_write(ctx, &id).await?;
        require(actor, Resource::User(&*guard), Action::ChangeRole(to), "cannot change this role")?;
        let from = guard.role;
        if !role_transition_allowed(from, to) {
            return Err(EngineError::InvalidRoleTransition { from, to });
        }
        ctx.check()?;
        let guard = self
            .commit_user_event(guard, Event::UserRoleChanged { id, role: to })
            .await?;
        tracing::info!(user_id = %id, %from, %to, actor = %actor.id, "role changed");
        Ok(guard.clone())
    }

    /// Banned users can no longer book or create listings. Existing bookings are untouched.
    pub async fn set_banned(
        &self,
        ctx: &RequestContext,
        actor: &ActingUser,
        id: Ulid,
        banned: bool,
    ) -> Result<User, EngineError> {
        self.check_actor(ctx, actor).await?;
        let guard = self.user_write(ctx, &id).await?;
        require(actor, Resource::User(&*guard), Action::Ban, "only admins can ban")?;
        if guard.banned == banned {
            return Ok(guard.clone());
        }
        ctx.check()?;
        let guard = self
            .commit_user_event(guard, Event::UserBanned { id, banned })
            .await?;
        tracing::info!(user_id = %id, banned, actor = %actor.id, "ban flag changed");
        Ok(guard.clone())
    }

    /// Directory listing for admins, oldest first.
    pub async fn list_users(
        &self,
        ctx: &RequestContext,
        actor: &ActingUser,
        role: Option<Role>,
        limit: usize,
        offset: usize,
    ) -> Result<Page<User>, EngineError> {
        require(actor, Resource::Directory, Action::ListUsers, "only admins list users")?;
        let mut matching = Vec::new();
        for id in self.store.user_ids() {
            let Some(user) = self.store.get_user(&id) else { continue };
            let guard = ctx.guard(user.read_owned()).await?;
            if role.is_none_or(|r| guard.role == r) {
                matching.push(guard.clone());
            }
        }
        let total = matching.len();
        let items = matching
            .into_iter()
            .skip(offset)
            .take(page_size(limit))
            .collect();
        Ok(Page { items, total })
    }

    pub fn user_exists(&self, id: &Ulid) -> bool {
        self.store.contains_user(id)
    }

    pub async fn count_users(
        &self,
        ctx: &RequestContext,
        role: Option<Role>,
    ) -> Result<usize, EngineError> {
        let Some(role) = role else {
            return Ok(self.store.user_count());
        };
        let mut count = 0;
        for id in self.store.user_ids() {
            let Some(user) = self.store.get_user(&id) else { continue };
            if ctx.guard(user.read_owned()).await?.role == role {
                count += 1;
            }
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_table() {
        use Role::*;
        assert!(role_transition_allowed(Guest, Host));
        assert!(role_transition_allowed(Host, Guest));
        assert!(role_transition_allowed(Host, Admin));
        assert!(role_transition_allowed(Admin, Guest));
        assert!(!role_transition_allowed(Guest, Admin));
        assert!(!role_transition_allowed(Guest, Guest));
    }

    #[test]
    fn email_shapes() {
        assert!(validate_email("ann@example.com").is_ok());
        assert!(validate_email(" ann@example.com ").is_ok());
        assert!(validate_email("ann.example.com").is_err());
        assert!(validate_email("@example.com").is_err());
        assert!(validate_email("ann@localhost").is_err());
        let long = format!("{}@example.com", "a".repeat(MAX_EMAIL_LEN));
        assert!(matches!(validate_email(&long), Err(EngineError::LimitExceeded(_))));
    }

    #[test]
    fn phone_shapes() {
        assert!(validate_phone(None).is_ok());
        assert!(validate_phone(Some("+1 555-0100")).is_ok());
        assert!(validate_phone(Some("+")).is_err());
        assert!(validate_phone(Some("call me")).is_err());
    }
}
