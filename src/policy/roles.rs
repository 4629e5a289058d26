//! Role-based permission checks.
//!
//! Every privileged engine operation asks this module instead of comparing
//! user ids itself:
//! - Key issuance, grants and revocations need owner or admin
//! - Role changes need the owner (or an admin, when the deployment allows)
//! - Admins never change their own role
//! - The owner's role, and the owner role itself, are never assignable

use crate::registry::Role;
use crate::KeywardenError;

/// Check that a role may administer access.
///
/// # Returns
/// * `Ok(())` - Role is owner or admin
/// * `Err(Forbidden)` - Role is a regular member
pub fn check_privileged(role: Role) -> Result<(), KeywardenError> {
    if role.is_privileged() {
        Ok(())
    } else {
        Err(KeywardenError::Forbidden)
    }
}

/// Check a role change.
///
/// # Arguments
/// * `acting` - Role of the user requesting the change
/// * `target` - Current role of the user being changed
/// * `new_role` - Role being assigned
/// * `targets_self` - Whether acting and target are the same user
/// * `allow_admin_promotion` - Whether admins may change other non-owner roles
///
/// # Returns
/// * `Ok(())` - Change permitted
/// * `Err(Forbidden)` - Acting user may not change roles, or an admin
///   targets themselves
/// * `Err(InvalidTarget)` - Target is the owner, or `new_role` is owner
pub fn check_role_change(
    acting: Role,
    target: Role,
    new_role: Role,
    targets_self: bool,
    allow_admin_promotion: bool,
) -> Result<(), KeywardenError> {
    let may_change = match acting {
        Role::Owner => true,
        Role::Admin => allow_admin_promotion && !targets_self,
        Role::Member => false,
    };
    if !may_change {
        return Err(KeywardenError::Forbidden);
    }

    if target == Role::Owner || new_role == Role::Owner {
        return Err(KeywardenError::InvalidTarget);
    }

    Ok(())
}
