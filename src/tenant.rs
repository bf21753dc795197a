use worker::*;

use crate::models::Workspace;

pub const TENANT_ID_HEADER: &str = "x-tenant-id";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantContext {
    pub tenant_id: String,
}

impl TenantContext {
    /// Whether the caller's tenant owns `workspace`.
    pub fn owns(&self, workspace: &Workspace) -> bool {
        self.tenant_id == workspace.tenant_id
    }
}

/// Tenant named by the `x-tenant-id` header, if any.
pub fn tenant_from_request(req: &Request) -> Result<Option<TenantContext>> {
    Ok(tenant_from_header(req.headers().get(TENANT_ID_HEADER)?))
}

fn tenant_from_header(value: Option<String>) -> Option<TenantContext> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(|tenant_id| TenantContext { tenant_id })
}

/// The workspace if the caller may see it. A missing header and another
/// tenant's workspace look the same as a missing workspace.
pub fn visible_to(tenant: Option<&TenantContext>, workspace: Option<Workspace>) -> Option<Workspace> {
    match (tenant, workspace) {
        (Some(tenant), Some(ws)) if tenant.owns(&ws) => Some(ws),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CreateInput, WorkspaceCreate};
    use chrono::Utc;

    fn workspace(tenant: &str) -> Workspace {
        WorkspaceCreate {
            workspace_id: Some("w1".to_string()),
            tenant_id: tenant.to_string(),
            created_by: "u1".to_string(),
            contract_version: "v1".to_string(),
            risk_profile: "low".to_string(),
            ttl_hours: 24,
            policy_bundle_ref: "pb".to_string(),
            policy_bundle_checksum: "abc".to_string(),
            ..Default::default()
        }
        .into_record(Utc::now())
        .unwrap()
    }

    fn ctx(tenant: &str) -> TenantContext {
        TenantContext {
            tenant_id: tenant.to_string(),
        }
    }

    #[test]
    fn header_is_trimmed_and_blank_is_absent() {
        assert_eq!(tenant_from_header(Some(" t1 ".into())), Some(ctx("t1")));
        assert_eq!(tenant_from_header(Some("   ".into())), None);
        assert_eq!(tenant_from_header(None), None);
    }

    #[test]
    fn only_the_owning_tenant_sees_a_workspace() {
        assert!(visible_to(Some(&ctx("t1")), Some(workspace("t1"))).is_some());
        assert!(visible_to(Some(&ctx("t2")), Some(workspace("t1"))).is_none());
        assert!(visible_to(None, Some(workspace("t1"))).is_none());
        assert!(visible_to(Some(&ctx("t1")), None).is_none());
    }
}
