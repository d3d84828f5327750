use proxer_proto::{ErrorKind, ProxerError};

use crate::forward::ForwardError;

#[derive(Debug, thiserror::Error)]
pub enum ProxyPathError {
    #[error("request path is empty")]
    EmptyPath,
    #[error("request body of {0} bytes exceeds the configured limit")]
    RequestTooLarge(usize),
    #[error("access token missing or incorrect")]
    AccessDenied,
    #[error("tenant '{tenant_id}' exceeded its rate limit")]
    TenantRateLimited { tenant_id: String, plan_id: String },
    #[error("route '{tenant_id}/{route_id}' exceeded its rate limit")]
    RouteRateLimited {
        tenant_id: String,
        route_id: String,
        plan_id: String,
    },
    #[error("tenant '{tenant_id}' exceeded its monthly traffic cap")]
    MonthlyCapExceeded { tenant_id: String, plan_id: String },
    #[error("no route or connected tunnel matches this path")]
    NotFound,
    #[error(transparent)]
    Hub(#[from] proxer_session_hub::HubError),
    #[error(transparent)]
    Forward(#[from] ForwardError),
}

impl From<ProxyPathError> for ProxerError {
    fn from(err: ProxyPathError) -> Self {
        let message = err.to_string();
        match err {
            ProxyPathError::EmptyPath | ProxyPathError::NotFound => {
                ProxerError::not_found(message)
            }
            ProxyPathError::RequestTooLarge(_) => ProxerError::new(ErrorKind::PayloadTooLarge, message),
            ProxyPathError::AccessDenied => ProxerError::forbidden(message),
            ProxyPathError::TenantRateLimited { tenant_id, plan_id } => {
                ProxerError::new(ErrorKind::RateLimited, message)
                    .with_code("tenant_rate_limit_exceeded")
                    .with_tenant(tenant_id)
                    .with_plan(plan_id)
            }
            ProxyPathError::RouteRateLimited {
                tenant_id,
                route_id,
                plan_id,
            } => ProxerError::new(ErrorKind::RateLimited, message)
                .with_code("route_rate_limit_exceeded")
                .with_tenant(tenant_id)
                .with_route(route_id)
                .with_plan(plan_id),
            ProxyPathError::MonthlyCapExceeded { tenant_id, plan_id } => {
                ProxerError::new(ErrorKind::RateLimited, message)
                    .with_code("monthly_traffic_cap_exceeded")
                    .with_tenant(tenant_id)
                    .with_plan(plan_id)
            }
            ProxyPathError::Hub(hub_err) => hub_err.into(),
            ProxyPathError::Forward(forward_err) => match forward_err {
                ForwardError::Timeout => ProxerError::gateway_timeout(forward_err.to_string()),
                ForwardError::ResponseTooLarge => {
                    ProxerError::new(ErrorKind::PayloadTooLarge, forward_err.to_string())
                }
                ForwardError::Upstream(_) | ForwardError::InvalidTarget(_) => {
                    ProxerError::bad_gateway(forward_err.to_string())
                }
            },
        }
    }
}
