// Copyright (c) FleetWire contributors.
// Licensed under the MIT License.

//! [`Scope`]: the per-call tenant/operator binding every store access must carry.
//!
//! This replaces the "global connection pool with an implicit per-request context variable"
//! pattern with an explicit value every store call takes as a parameter — forgetting to pass
//! one is a compile error, not a runtime gap. The storage layer's row filter is keyed on the
//! scope's tenant id; an empty or otherwise-unmatched id naturally fails closed by matching no
//! rows, without a separate "unset" state to forget to check.

use crate::audit::AuditLog;

/// How a [`Scope`] was entered.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ScopeMode {
    /// Bound to exactly one tenant; store calls are filtered to that tenant's rows.
    Tenant(String),
    /// Bypasses the per-tenant filter. Only constructible through [`Scope::operator`], which
    /// writes an [`crate::model::AuditRecord`] before returning.
    Operator(String),
}

/// A tenant or operator binding, required by every [`crate::store::RelationalStore`] and
/// [`crate::store::TimeSeriesStore`] call.
#[derive(Debug, Clone)]
pub struct Scope {
    mode: ScopeMode,
}

impl Scope {
    /// Enter scope bound to a single tenant. Store calls made with this scope only see rows
    /// owned by `tenant_id`. Passing an empty string is valid and simply matches nothing.
    #[must_use]
    pub fn tenant(tenant_id: impl Into<String>) -> Self {
        Self {
            mode: ScopeMode::Tenant(tenant_id.into()),
        }
    }

    /// Enter operator scope, bypassing the per-tenant filter. Synchronously writes an
    /// [`crate::model::AuditRecord`] to `audit` before returning, so the access is always
    /// logged before any store call that uses the resulting scope can run.
    #[must_use]
    pub fn operator(
        operator_id: impl Into<String>,
        action: impl Into<String>,
        target_tenant: Option<String>,
        request_ip: impl Into<String>,
        audit: &AuditLog,
    ) -> Self {
        let operator_id = operator_id.into();
        audit.record(operator_id.clone(), action, target_tenant, request_ip, 200);
        Self {
            mode: ScopeMode::Operator(operator_id),
        }
    }

    /// The tenant filter to apply, or `None` if this scope bypasses tenant filtering
    /// (operator mode).
    #[must_use]
    pub fn tenant_filter(&self) -> Option<&str> {
        match &self.mode {
            ScopeMode::Tenant(t) => Some(t.as_str()),
            ScopeMode::Operator(_) => None,
        }
    }

    /// True if a row owned by `tenant_id` is visible through this scope.
    #[must_use]
    pub fn permits(&self, tenant_id: &str) -> bool {
        match self.tenant_filter() {
            Some(scoped) => scoped == tenant_id,
            None => true,
        }
    }

    /// True if this scope was entered in operator (cross-tenant) mode.
    #[must_use]
    pub fn is_operator(&self) -> bool {
        matches!(self.mode, ScopeMode::Operator(_))
    }
}
