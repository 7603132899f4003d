//! Team-membership synchronisation.
//!
//! Members are matched by login. Missing accounts are created with a default
//! password, existing ones are left alone or have their role patched, and a
//! role that cannot be assigned is downgraded once to [`FALLBACK_ROLE`].

use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::config::MemberScenario;
use crate::contract::InstanceApi;
use crate::error::{ApiError, SyncError};
use crate::model::{Id, NewUser, UserInfo};
use crate::progress::{ProgressLevel, ProgressSink};
use crate::synchronise::{resolve_team, source_team};

/// Lowest-privilege role, used when the source role cannot be assigned.
pub const FALLBACK_ROLE: &str = "annotator";

/// Outcome of a member synchronisation.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MembersReport {
    /// Accounts created at the destination.
    pub created: usize,
    /// Members added to the destination team.
    pub added: usize,
    pub role_updated: usize,
    pub unchanged: usize,
    pub skipped_disabled: usize,
    /// Members who got [`FALLBACK_ROLE`] instead of their source role.
    pub downgraded: usize,
    /// Logins that could not be synchronised.
    pub failed: Vec<String>,
}

/// Position of a role in the privilege order. Unknown roles sort first.
pub fn role_rank(role: &str) -> u8 {
    match role {
        "viewer" => 1,
        "annotator" => 2,
        "reviewer" => 3,
        "manager" => 4,
        "developer" => 5,
        "admin" => 6,
        _ => 0,
    }
}

enum RoleCall<'a> {
    Change(Id),
    Add(&'a str),
}

/// Synchronises the members of `team_id` whose logins are in `logins`.
///
/// Members are processed in ascending privilege order, so higher roles are
/// applied last. A disabled source account is never created and costs no
/// role call.
#[allow(clippy::too_many_arguments)]
pub async fn sync_members(
    dst: &dyn InstanceApi,
    src: &dyn InstanceApi,
    team_id: Id,
    logins: &[String],
    default_password: Option<&str>,
    scenario: MemberScenario,
    progress: &dyn ProgressSink,
) -> Result<MembersReport, SyncError> {
    let mut report = MembersReport::default();
    if logins.is_empty() {
        debug!("[MEMBERS] No members selected");
        return Ok(report);
    }
    info!(team_id, ?scenario, count = logins.len(), "[MEMBERS] Starting member synchronisation");

    let src_team = source_team(src, team_id).await?;
    let dst_team = resolve_team(dst, &src_team).await?;

    let mut members: Vec<UserInfo> = src
        .list_team_members(src_team.id)
        .await?
        .into_iter()
        .filter(|m| logins.contains(&m.login))
        .collect();
    members.sort_by_key(|m| role_rank(&m.role));
    for login in logins {
        if !members.iter().any(|m| &m.login == login) {
            warn!(login = %login, "[MEMBERS] Selected member not found in source team");
        }
    }

    let roles: HashMap<String, Id> = dst
        .list_roles()
        .await?
        .into_iter()
        .map(|r| (r.role, r.id))
        .collect();
    let existing: HashMap<String, UserInfo> = dst
        .list_team_members(dst_team.id)
        .await?
        .into_iter()
        .map(|m| (m.login.clone(), m))
        .collect();

    progress.start(ProgressLevel::Members, "Synchronizing team members", members.len());
    for member in &members {
        let outcome = sync_member(
            dst,
            member,
            existing.get(&member.login),
            dst_team.id,
            &roles,
            default_password,
            scenario,
            &mut report,
        )
        .await;
        if let Err(e) = outcome {
            warn!(login = %member.login, error = %e, "[MEMBERS] Member synchronisation failed");
            report.failed.push(member.login.clone());
        }
        progress.advance(ProgressLevel::Members, 1);
    }
    progress.finish(ProgressLevel::Members);

    info!(
        created = report.created,
        added = report.added,
        role_updated = report.role_updated,
        unchanged = report.unchanged,
        skipped_disabled = report.skipped_disabled,
        downgraded = report.downgraded,
        failed = report.failed.len(),
        "[MEMBERS] Member synchronisation finished"
    );
    Ok(report)
}

#[allow(clippy::too_many_arguments)]
async fn sync_member(
    dst: &dyn InstanceApi,
    member: &UserInfo,
    in_team: Option<&UserInfo>,
    dst_team_id: Id,
    roles: &HashMap<String, Id>,
    default_password: Option<&str>,
    scenario: MemberScenario,
    report: &mut MembersReport,
) -> Result<(), SyncError> {
    if let Some(current) = in_team {
        if current.disabled {
            debug!(login = %member.login, "[MEMBERS] Destination member disabled, skipping");
            report.skipped_disabled += 1;
            return Ok(());
        }
        if scenario == MemberScenario::Ignore || current.role == member.role {
            report.unchanged += 1;
            return Ok(());
        }
        let downgraded = assign_role(
            dst,
            RoleCall::Change(current.id),
            dst_team_id,
            &member.role,
            roles,
        )
        .await?;
        report.role_updated += 1;
        if downgraded {
            report.downgraded += 1;
        }
        return Ok(());
    }

    if member.disabled {
        info!(login = %member.login, "[MEMBERS] Source member disabled, skipping");
        report.skipped_disabled += 1;
        return Ok(());
    }

    match dst.find_user_by_login(&member.login).await? {
        Some(user) if user.disabled => {
            info!(login = %member.login, "[MEMBERS] Destination account disabled, skipping");
            report.skipped_disabled += 1;
            return Ok(());
        }
        Some(_) => {}
        None => {
            let Some(password) = default_password else {
                return Err(SyncError::Api(ApiError::Rejected(format!(
                    "no default password to create user {}",
                    member.login
                ))));
            };
            dst.create_user(NewUser {
                login: member.login.clone(),
                password: password.to_string(),
                name: member.name.clone().unwrap_or_default(),
                email: member.email.clone().unwrap_or_default(),
            })
            .await?;
            info!(login = %member.login, "[MEMBERS] Created destination account");
            report.created += 1;
        }
    }

    let downgraded = assign_role(
        dst,
        RoleCall::Add(&member.login),
        dst_team_id,
        &member.role,
        roles,
    )
    .await?;
    report.added += 1;
    if downgraded {
        report.downgraded += 1;
    }
    Ok(())
}

async fn apply_role(
    dst: &dyn InstanceApi,
    call: &RoleCall<'_>,
    team_id: Id,
    role_id: Id,
) -> Result<(), ApiError> {
    match call {
        RoleCall::Change(user_id) => dst.change_team_role(*user_id, team_id, role_id).await,
        RoleCall::Add(login) => dst.add_to_team_by_login(login, team_id, role_id).await,
    }
}

/// Assigns `role`, falling back once to [`FALLBACK_ROLE`]. Returns whether the
/// fallback was used.
async fn assign_role(
    dst: &dyn InstanceApi,
    call: RoleCall<'_>,
    team_id: Id,
    role: &str,
    roles: &HashMap<String, Id>,
) -> Result<bool, SyncError> {
    let fallback_id = roles.get(FALLBACK_ROLE).copied();

    match roles.get(role) {
        Some(role_id) => match apply_role(dst, &call, team_id, *role_id).await {
            Ok(()) => return Ok(false),
            Err(e) if role == FALLBACK_ROLE => return Err(e.into()),
            Err(e) => warn!(
                role,
                error = %e,
                "[MEMBERS] Role assignment failed, using {FALLBACK_ROLE}"
            ),
        },
        None => warn!(role, "[MEMBERS] Role unknown at destination, using {FALLBACK_ROLE}"),
    }

    let fallback_id = fallback_id.ok_or(ApiError::NotFound {
        what: "role",
        id: 0,
    })?;
    apply_role(dst, &call, team_id, fallback_id).await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_sort_by_privilege() {
        let mut roles = vec!["admin", "viewer", "manager", "annotator", "custom"];
        roles.sort_by_key(|r| role_rank(r));
        assert_eq!(roles, vec!["custom", "viewer", "annotator", "manager", "admin"]);
    }
}
