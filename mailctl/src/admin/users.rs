//! Privileged user operations.
//!
//! Every mutation here runs on behalf of an [`Actor`] and writes exactly one activity entry.
//! Credit changes go through the [`Ledger`], which writes its own entry and transaction, so they
//! are never recorded twice.

use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use crate::admin::activity::record;
use crate::auth::password;
use crate::checker::syntax;
use crate::db::{
    Database,
    errors::DbError,
    handlers::{ApiKeys, Plans, Repository, Users},
    models::{
        activity::{ActivityAction, Actor, TargetType},
        api_keys::ApiKeyDBResponse,
        transactions::TransactionDBResponse,
        users::{UserCreateDBRequest, UserDBResponse, UserUpdateDBRequest},
    },
};
use crate::errors::{Error, Result};
use crate::jobs::JobManager;
use crate::ledger::{BalanceSnapshot, CreditChange, Ledger, LedgerError, MAX_BALANCE, PlanAssignment};
use crate::types::{Credits, Operation, PlanId, Role, UserId, abbrev_uuid};

/// Input for creating an account.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    pub role: Role,
    pub password: Option<String>,
}

/// A freshly created account with its first API key.
#[derive(Debug, Clone)]
pub struct Provisioned {
    pub user: UserDBResponse,
    pub key: ApiKeyDBResponse,
    /// Raw key secret, returned once
    pub secret: String,
}

#[derive(Clone)]
pub struct UserAdmin {
    db: Database,
    ledger: Ledger,
    jobs: JobManager,
    default_plan: Option<String>,
    default_rate_limit: u32,
}

impl UserAdmin {
    pub fn new(db: Database, ledger: Ledger, jobs: JobManager, default_plan: Option<String>, default_rate_limit: u32) -> Self {
        Self {
            db,
            ledger,
            jobs,
            default_plan,
            default_rate_limit,
        }
    }

    pub fn default_rate_limit(&self) -> u32 {
        self.default_rate_limit
    }

    pub(crate) fn user(&self, id: UserId) -> Result<UserDBResponse> {
        Users::new(&self.db).get_by_id(id)?.ok_or_else(|| Error::NotFound {
            resource: "User".to_string(),
            id: id.to_string(),
        })
    }

    fn protect_self(actor: &Actor, target: UserId, operation: Operation, reason: &str) -> Result<()> {
        if actor.user_id == target {
            return Err(DbError::ProtectedEntity {
                operation,
                reason: reason.to_string(),
                entity_type: "user".to_string(),
                entity_id: Some(target.to_string()),
            }
            .into());
        }
        Ok(())
    }

    /// Create a user, open their credit account on the default plan, and issue a first key.
    #[instrument(skip(self, request), fields(email = %request.email), err)]
    pub fn provision(&self, request: NewUser) -> Result<Provisioned> {
        let email = request.email.trim();
        if !syntax::is_valid(email) {
            return Err(Error::BadRequest {
                message: format!("'{email}' is not a valid email address"),
            });
        }
        if request.name.trim().is_empty() {
            return Err(Error::BadRequest {
                message: "Name cannot be empty".to_string(),
            });
        }
        let password_hash = match request.password.as_deref() {
            Some(password) => {
                password::check_password_strength(password)?;
                Some(password::hash_password(password)?)
            }
            None => None,
        };

        let users = Users::new(&self.db);
        let user = users.create(&UserCreateDBRequest {
            email: email.to_string(),
            name: request.name,
            role: request.role,
            password_hash,
        })?;

        let now = Utc::now();
        let plan = match &self.default_plan {
            Some(name) => Plans::new(&self.db).get_by_name(name)?.map(|plan| PlanAssignment::start(&plan, now)),
            None => None,
        };
        if let Err(e) = self.ledger.open_account(user.id, plan) {
            users.delete(user.id)?;
            return Err(e.into());
        }

        let (key, secret) = match ApiKeys::new(&self.db).issue(user.id, "default", self.default_rate_limit) {
            Ok(issued) => issued,
            Err(e) => {
                let _ = self.ledger.close_account(user.id);
                users.delete(user.id)?;
                return Err(e.into());
            }
        };
        info!(user_id = %abbrev_uuid(&user.id), "Provisioned user");
        Ok(Provisioned { user, key, secret })
    }

    pub fn create(&self, actor: &Actor, request: NewUser) -> Result<Provisioned> {
        let role = request.role;
        let provisioned = self.provision(request)?;
        record(
            &self.db,
            actor,
            ActivityAction::CreateUser,
            TargetType::User,
            Some(provisioned.user.id.to_string()),
            &provisioned.user.email,
            json!({ "role": role }),
        );
        Ok(provisioned)
    }

    pub fn get(&self, id: UserId) -> Result<(UserDBResponse, Option<BalanceSnapshot>)> {
        let user = self.user(id)?;
        let credits = match self.ledger.balance(id) {
            Ok(snapshot) => Some(snapshot),
            Err(LedgerError::AccountNotFound(_)) => None,
            Err(e) => return Err(e.into()),
        };
        Ok((user, credits))
    }

    #[instrument(skip(self, actor, email, name), fields(user_id = %abbrev_uuid(&id)), err)]
    pub fn update(&self, actor: &Actor, id: UserId, email: Option<String>, name: Option<String>) -> Result<UserDBResponse> {
        let before = self.user(id)?;
        if let Some(email) = email.as_deref()
            && !syntax::is_valid(email.trim())
        {
            return Err(Error::BadRequest {
                message: format!("'{email}' is not a valid email address"),
            });
        }
        if name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(Error::BadRequest {
                message: "Name cannot be empty".to_string(),
            });
        }

        let updated = Users::new(&self.db).update(
            id,
            &UserUpdateDBRequest {
                email: email.clone(),
                name: name.clone(),
                ..Default::default()
            },
        )?;
        record(
            &self.db,
            actor,
            ActivityAction::UpdateUser,
            TargetType::User,
            Some(id.to_string()),
            &updated.email,
            json!({
                "email": email.map(|_| json!({ "from": before.email, "to": updated.email })),
                "name": name.map(|_| json!({ "from": before.name, "to": updated.name })),
            }),
        );
        Ok(updated)
    }

    #[instrument(skip(self, actor), fields(user_id = %abbrev_uuid(&id)), err)]
    pub fn set_active(&self, actor: &Actor, id: UserId, active: bool) -> Result<UserDBResponse> {
        if !active {
            Self::protect_self(actor, id, Operation::Update, "admins cannot deactivate themselves")?;
        }
        self.user(id)?;
        let updated = Users::new(&self.db).update(
            id,
            &UserUpdateDBRequest {
                is_active: Some(active),
                ..Default::default()
            },
        )?;
        let action = if active {
            ActivityAction::ActivateUser
        } else {
            ActivityAction::DeactivateUser
        };
        record(&self.db, actor, action, TargetType::User, Some(id.to_string()), &updated.email, json!({}));
        Ok(updated)
    }

    #[instrument(skip(self, actor), fields(user_id = %abbrev_uuid(&id)), err)]
    pub fn set_role(&self, actor: &Actor, id: UserId, role: Role) -> Result<UserDBResponse> {
        if role != Role::Admin {
            Self::protect_self(actor, id, Operation::Update, "admins cannot remove their own admin role")?;
        }
        let before = self.user(id)?;
        let updated = Users::new(&self.db).update(
            id,
            &UserUpdateDBRequest {
                role: Some(role),
                ..Default::default()
            },
        )?;
        record(
            &self.db,
            actor,
            ActivityAction::ChangeRole,
            TargetType::User,
            Some(id.to_string()),
            &updated.email,
            json!({ "from": before.role, "to": role }),
        );
        Ok(updated)
    }

    /// Replace the password with a generated one, returned once.
    #[instrument(skip(self, actor), fields(user_id = %abbrev_uuid(&id)), err)]
    pub fn reset_password(&self, actor: &Actor, id: UserId) -> Result<String> {
        let user = self.user(id)?;
        let temporary = password::generate_temporary_password();
        Users::new(&self.db).update(
            id,
            &UserUpdateDBRequest {
                password_hash: Some(password::hash_password(&temporary)?),
                ..Default::default()
            },
        )?;
        record(
            &self.db,
            actor,
            ActivityAction::ResetPassword,
            TargetType::User,
            Some(id.to_string()),
            &user.email,
            json!({}),
        );
        Ok(temporary)
    }

    pub fn adjust_credits(&self, actor: &Actor, id: UserId, amount: Credits, reason: Option<&str>) -> Result<CreditChange> {
        self.user(id)?;
        if amount == 0 {
            return Err(Error::BadRequest {
                message: "Adjustment amount cannot be zero".to_string(),
            });
        }
        if amount.unsigned_abs() > MAX_BALANCE.unsigned_abs() {
            return Err(Error::BadRequest {
                message: format!("Adjustment amount cannot exceed {MAX_BALANCE} credits"),
            });
        }
        Ok(self.ledger.adjust(id, amount, reason.unwrap_or("Admin adjustment"), actor)?)
    }

    pub fn set_credits(&self, actor: &Actor, id: UserId, value: Credits, reason: Option<&str>) -> Result<CreditChange> {
        self.user(id)?;
        if value > MAX_BALANCE {
            return Err(Error::BadRequest {
                message: format!("Balance cannot exceed {MAX_BALANCE} credits"),
            });
        }
        Ok(self.ledger.set_absolute(id, value, reason.unwrap_or("Admin set balance"), actor)?)
    }

    /// Move the user onto a plan without payment.
    #[instrument(skip(self, actor), fields(user_id = %abbrev_uuid(&id)), err)]
    pub fn set_plan(&self, actor: &Actor, id: UserId, plan_id: PlanId) -> Result<TransactionDBResponse> {
        let user = self.user(id)?;
        let plan = Plans::new(&self.db).get_by_id(plan_id)?.ok_or_else(|| Error::NotFound {
            resource: "Plan".to_string(),
            id: plan_id.to_string(),
        })?;
        let transaction = self.ledger.subscribe(
            id,
            &plan,
            0,
            Decimal::ZERO,
            Some(format!("admin:{}", actor.user_id)),
            Some(actor.user_id),
            Utc::now(),
        )?;
        record(
            &self.db,
            actor,
            ActivityAction::SetPlan,
            TargetType::User,
            Some(id.to_string()),
            &user.email,
            json!({ "plan_id": plan.id, "plan": plan.name, "transaction_id": transaction.id }),
        );
        Ok(transaction)
    }

    /// Remove a user and everything they own.
    ///
    /// The user is deactivated and their API keys revoked first, so no new job can be submitted.
    /// Running jobs are then cancelled (refunding their holds) and removed, the credit account is
    /// closed, keys are removed, and the user record goes.
    #[instrument(skip(self, actor), fields(user_id = %abbrev_uuid(&id)), err)]
    pub fn delete(&self, actor: &Actor, id: UserId) -> Result<()> {
        Self::protect_self(actor, id, Operation::Delete, "admins cannot delete themselves")?;
        let user = self.user(id)?;

        Users::new(&self.db).update(
            id,
            &UserUpdateDBRequest {
                is_active: Some(false),
                ..Default::default()
            },
        )?;
        let keys = ApiKeys::new(&self.db);
        for key in keys.list(&crate::db::models::api_keys::ApiKeyFilter {
            user_id: Some(id),
            is_active: Some(true),
            skip: 0,
            limit: i64::MAX,
        })? {
            keys.revoke(key.id)?;
        }

        // A request authenticated before the revocation can still land a job, so sweep again
        // when the account turns out to be held.
        let mut jobs_removed = 0;
        let mut attempts = 0;
        let final_balance = loop {
            jobs_removed += self.jobs.delete_user_jobs(id)?;
            attempts += 1;
            match self.ledger.close_account(id) {
                Ok(snapshot) => break snapshot.balance,
                Err(LedgerError::AccountNotFound(_)) => break 0,
                Err(LedgerError::OutstandingReservations(_)) if attempts < 3 => {
                    debug!(attempts, "Jobs appeared during deletion, sweeping again");
                }
                Err(e) => return Err(e.into()),
            }
        };
        let keys_removed = keys.delete_for_user(id)?;

        if !Users::new(&self.db).delete(id)? {
            warn!(user_id = %abbrev_uuid(&id), "User disappeared during deletion");
        }
        record(
            &self.db,
            actor,
            ActivityAction::DeleteUser,
            TargetType::User,
            Some(id.to_string()),
            &user.email,
            json!({
                "jobs_removed": jobs_removed,
                "api_keys_removed": keys_removed,
                "final_balance": final_balance,
            }),
        );
        info!(jobs_removed, keys_removed, "Deleted user");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::handlers::Activity;
    use crate::db::models::{activity::ActivityFilter, plans::PlanCreateDBRequest};
    use crate::jobs::{JobKind, JobStatus, JobStore};
    use uuid::Uuid;

    fn setup() -> (UserAdmin, Actor) {
        let db = Database::new();
        let ledger = Ledger::new(db.clone());
        Plans::new(&db)
            .create(&PlanCreateDBRequest {
                name: "Free".to_string(),
                description: None,
                price: Decimal::ZERO,
                credits_limit: 100,
                billing_period_days: 30,
                is_active: true,
            })
            .unwrap();
        let jobs = JobManager::new(JobStore::new(), ledger.clone(), None, 1);
        let admin = UserAdmin::new(db, ledger, jobs, Some("Free".to_string()), 60);
        let actor = Actor {
            user_id: Uuid::new_v4(),
            email: "root@example.com".to_string(),
            ip: Some("203.0.113.1".to_string()),
        };
        (admin, actor)
    }

    fn new_user(email: &str) -> NewUser {
        NewUser {
            email: email.to_string(),
            name: "Jane".to_string(),
            role: Role::User,
            password: Some("hunter2hunter2".to_string()),
        }
    }

    fn activity_count(admin: &UserAdmin) -> i64 {
        Activity::new(&admin.db).count(&ActivityFilter::new(0, 100)).unwrap()
    }

    #[test]
    fn test_provision_opens_account_on_default_plan() {
        let (admin, _) = setup();
        let provisioned = admin.provision(new_user("jane@example.com")).unwrap();

        let (_, credits) = admin.get(provisioned.user.id).unwrap();
        let credits = credits.unwrap();
        assert_eq!(credits.plan_credits, 100);
        assert_eq!(credits.plan.unwrap().name, "Free");
        assert!(provisioned.secret.starts_with("sk-"));
        assert_eq!(provisioned.key.user_id, provisioned.user.id);
    }

    #[test]
    fn test_provision_rejects_bad_input() {
        let (admin, _) = setup();
        assert!(matches!(admin.provision(new_user("not-an-email")), Err(Error::BadRequest { .. })));

        let mut weak = new_user("weak@example.com");
        weak.password = Some("short".to_string());
        assert!(matches!(admin.provision(weak), Err(Error::BadRequest { .. })));

        admin.provision(new_user("dup@example.com")).unwrap();
        let err = admin.provision(new_user("DUP@example.com")).unwrap_err();
        assert!(matches!(err, Error::Database(DbError::UniqueViolation { .. })));
    }

    #[test]
    fn test_each_mutation_writes_one_entry() {
        let (admin, actor) = setup();
        let user = admin.create(&actor, new_user("audited@example.com")).unwrap().user;
        assert_eq!(activity_count(&admin), 1);

        admin.set_active(&actor, user.id, false).unwrap();
        admin.set_role(&actor, user.id, Role::Admin).unwrap();
        admin.reset_password(&actor, user.id).unwrap();
        admin.adjust_credits(&actor, user.id, 50, Some("goodwill")).unwrap();
        admin.set_credits(&actor, user.id, 10, None).unwrap();
        assert_eq!(activity_count(&admin), 6);
    }

    #[test]
    fn test_reset_password_replaces_hash() {
        let (admin, actor) = setup();
        let user = admin.provision(new_user("reset@example.com")).unwrap().user;

        let temporary = admin.reset_password(&actor, user.id).unwrap();
        let stored = admin.user(user.id).unwrap().password_hash.unwrap();
        assert!(password::verify_password(&temporary, &stored).unwrap());
        assert!(!password::verify_password("hunter2hunter2", &stored).unwrap());
    }

    #[test]
    fn test_admin_cannot_lock_themselves_out() {
        let (admin, _) = setup();
        let me = admin
            .provision(NewUser {
                role: Role::Admin,
                ..new_user("me@example.com")
            })
            .unwrap()
            .user;
        let actor = Actor {
            user_id: me.id,
            email: me.email.clone(),
            ip: None,
        };

        for result in [
            admin.set_active(&actor, me.id, false).map(|_| ()),
            admin.set_role(&actor, me.id, Role::User).map(|_| ()),
            admin.delete(&actor, me.id),
        ] {
            assert!(matches!(result, Err(Error::Database(DbError::ProtectedEntity { .. }))));
        }
        assert_eq!(activity_count(&admin), 0);
    }

    #[test]
    fn test_adjust_clamps_at_zero() {
        let (admin, actor) = setup();
        let user = admin.provision(new_user("clamp@example.com")).unwrap().user;

        let change = admin.adjust_credits(&actor, user.id, -1_000, None).unwrap();
        assert_eq!((change.before, change.after), (100, 0));
        assert!(matches!(
            admin.adjust_credits(&actor, Uuid::new_v4(), 5, None),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn test_set_plan_without_payment() {
        let (admin, actor) = setup();
        let user = admin.provision(new_user("plan@example.com")).unwrap().user;
        let pro = Plans::new(&admin.db)
            .create(&PlanCreateDBRequest {
                name: "Pro".to_string(),
                description: None,
                price: Decimal::from(49),
                credits_limit: 5_000,
                billing_period_days: 30,
                is_active: true,
            })
            .unwrap();

        let transaction = admin.set_plan(&actor, user.id, pro.id).unwrap();
        assert_eq!(transaction.amount_paid, Decimal::ZERO);
        assert_eq!(transaction.actor_id, Some(actor.user_id));
        assert_eq!(admin.ledger.balance(user.id).unwrap().plan_credits, 5_000);
    }

    #[test]
    fn test_delete_cascades() {
        let (admin, actor) = setup();
        let provisioned = admin.provision(new_user("gone@example.com")).unwrap();
        let user = provisioned.user.id;
        let job = admin
            .jobs
            .submit(user, JobKind::Bulk, vec!["a@example.com".to_string(), "b@example.com".to_string()], None, None)
            .unwrap();
        assert_eq!(job.status, JobStatus::Queued);

        admin.delete(&actor, user).unwrap();

        assert!(Users::new(&admin.db).get_by_id(user).unwrap().is_none());
        assert!(ApiKeys::new(&admin.db).get_by_id(provisioned.key.id).unwrap().is_none());
        assert!(matches!(admin.ledger.balance(user), Err(LedgerError::AccountNotFound(_))));
        assert!(admin.jobs.get(job.id, None).is_err());
        assert!(matches!(admin.delete(&actor, user), Err(Error::NotFound { .. })));
        assert_eq!(activity_count(&admin), 1);
    }

    #[test]
    fn test_delete_locks_the_user_out_before_cascading() {
        let (admin, actor) = setup();
        let provisioned = admin.provision(new_user("held@example.com")).unwrap();
        let user = provisioned.user.id;
        // A hold no job owns cannot be swept, so the delete stops at the account
        admin.ledger.reserve(user, 1, None).unwrap();

        assert!(matches!(admin.delete(&actor, user), Err(Error::Conflict { .. })));

        let stored = Users::new(&admin.db).get_by_id(user).unwrap().unwrap();
        assert!(!stored.is_active);
        let key = ApiKeys::new(&admin.db).get_by_id(provisioned.key.id).unwrap().unwrap();
        assert!(!key.is_active);
        assert_eq!(activity_count(&admin), 0);
    }
}
