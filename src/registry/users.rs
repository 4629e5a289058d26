//! In-memory user registry.

use crate::policy::roles::check_role_change;
use crate::registry::{AccessGrant, Role, UserId, UserRecord};
use crate::KeywardenError;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Owner of user records, role assignments and access grants.
#[derive(Debug)]
pub struct AccessRegistry {
    owner: UserId,
    users: RwLock<HashMap<UserId, UserRecord>>,
}

impl AccessRegistry {
    /// Create a registry seeded with the sole owner.
    pub fn new(owner: UserId, now: DateTime<Utc>) -> Self {
        let mut record = UserRecord::new(owner, now);
        record.role = Role::Owner;

        let mut users = HashMap::new();
        users.insert(owner, record);

        Self {
            owner,
            users: RwLock::new(users),
        }
    }

    /// The owner's id.
    pub fn owner(&self) -> UserId {
        self.owner
    }

    /// Record first contact with a user. Existing records are untouched.
    pub fn touch(&self, user: UserId, now: DateTime<Utc>) -> UserRecord {
        self.users
            .write()
            .entry(user)
            .or_insert_with(|| UserRecord::new(user, now))
            .clone()
    }

    /// Look up a user's record.
    pub fn get(&self, user: UserId) -> Option<UserRecord> {
        self.users.read().get(&user).cloned()
    }

    /// Role of a user; unknown users are members.
    pub fn role_of(&self, user: UserId) -> Role {
        self.users
            .read()
            .get(&user)
            .map(|record| record.role)
            .unwrap_or_default()
    }

    /// Grant access until `expiry` (`None` = permanent).
    ///
    /// The latest grant wins; durations do not stack.
    pub fn grant(
        &self,
        user: UserId,
        expiry: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> AccessGrant {
        let grant = AccessGrant::from_expiry(expiry);
        self.users
            .write()
            .entry(user)
            .or_insert_with(|| UserRecord::new(user, now))
            .access = grant;
        grant
    }

    /// Clear a user's granted access. Roles are untouched.
    ///
    /// A time-bound grant that lapsed before `now` counts as no grant; it is
    /// cleared anyway.
    ///
    /// # Errors
    /// * `NotFound` - User has no active granted access
    pub fn revoke(&self, user: UserId, now: DateTime<Utc>) -> Result<(), KeywardenError> {
        let mut users = self.users.write();
        let Some(record) = users.get_mut(&user) else {
            return Err(KeywardenError::NotFound);
        };

        let was_active = record.access.is_active(now);
        record.access = AccessGrant::None;
        if was_active {
            Ok(())
        } else {
            Err(KeywardenError::NotFound)
        }
    }

    /// Whether `user` is authorized at `now`.
    pub fn is_authorized(&self, user: UserId, now: DateTime<Utc>) -> bool {
        self.users
            .read()
            .get(&user)
            .is_some_and(|record| record.is_authorized(now))
    }

    /// Change a user's role.
    ///
    /// # Errors
    /// * `Forbidden` - `acting` may not change roles, or is an admin
    ///   changing their own
    /// * `InvalidTarget` - `target` is the owner, or `role` is owner
    pub fn set_role(
        &self,
        acting: UserId,
        target: UserId,
        role: Role,
        allow_admin_promotion: bool,
        now: DateTime<Utc>,
    ) -> Result<(), KeywardenError> {
        let mut users = self.users.write();
        let acting_role = users.get(&acting).map(|r| r.role).unwrap_or_default();
        let target_role = users.get(&target).map(|r| r.role).unwrap_or_default();

        check_role_change(
            acting_role,
            target_role,
            role,
            acting == target,
            allow_admin_promotion,
        )?;

        users
            .entry(target)
            .or_insert_with(|| UserRecord::new(target, now))
            .role = role;
        Ok(())
    }

    /// Users authorized at `now`, ascending by id.
    pub fn list_authorized(&self, now: DateTime<Utc>) -> Vec<UserId> {
        let mut ids: Vec<UserId> = self
            .users
            .read()
            .values()
            .filter(|record| record.is_authorized(now))
            .map(|record| record.id)
            .collect();
        ids.sort();
        ids
    }

    /// Owner and admins, ascending by id.
    pub fn list_admins(&self) -> Vec<UserId> {
        let mut ids: Vec<UserId> = self
            .users
            .read()
            .values()
            .filter(|record| record.role.is_privileged())
            .map(|record| record.id)
            .collect();
        ids.sort();
        ids
    }

    /// Clear time-bound grants that have lapsed at `now`.
    ///
    /// Role-based access is unaffected. Returns the number of grants cleared.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let mut cleared = 0;
        for record in self.users.write().values_mut() {
            if let AccessGrant::Until(until) = record.access {
                if until <= now {
                    record.access = AccessGrant::None;
                    cleared += 1;
                }
            }
        }
        cleared
    }

    /// Number of known users.
    pub fn len(&self) -> usize {
        self.users.read().len()
    }

    /// Whether the registry knows no users. Never true: the owner is seeded.
    pub fn is_empty(&self) -> bool {
        self.users.read().is_empty()
    }

    /// Copy out all records for persistence, ascending by id.
    pub fn export(&self) -> Vec<UserRecord> {
        let mut records: Vec<UserRecord> = self.users.read().values().cloned().collect();
        records.sort_by_key(|record| record.id);
        records
    }

    /// Replace the registry's records with persisted state.
    ///
    /// The configured owner always keeps the owner role; any other record
    /// claiming it is reduced to a member.
    pub fn restore(&self, records: Vec<UserRecord>, now: DateTime<Utc>) {
        let mut users: HashMap<UserId, UserRecord> = HashMap::with_capacity(records.len());
        for mut record in records {
            if record.role == Role::Owner && record.id != self.owner {
                tracing::warn!(user = %record.id, "Persisted owner does not match configuration, demoting");
                record.role = Role::Member;
            }
            users.insert(record.id, record);
        }

        users
            .entry(self.owner)
            .or_insert_with(|| UserRecord::new(self.owner, now))
            .role = Role::Owner;

        *self.users.write() = users;
    }
}
