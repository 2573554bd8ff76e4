pub const GROUP: &str = "gateway.portico.dev";

pub const GATEWAY_CLASS_CONTROLLER_NAME: &str = "gateway.portico.dev/control-plane";

pub const GATEWAY_CLASS_FINALIZER: &str = "gateway-exists-finalizer.gateway.networking.k8s.io";

pub const GATEWAY_API_GROUP: &str = "gateway.networking.k8s.io";
pub const TLS_ROUTE_API_VERSION: &str = "v1alpha2";

pub const OWNING_GATEWAY_NAME_LABEL: &str = "gateway.portico.dev/owning-gateway-name";
pub const OWNING_GATEWAY_NAMESPACE_LABEL: &str = "gateway.portico.dev/owning-gateway-namespace";

pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "portico-control-plane";

/// Kubernetes label values and DNS-1123 labels share this limit.
pub const DNS_LABEL_MAX_LENGTH: usize = 63;

pub const GATEWAY_DEPLOYMENT_SUFFIX: &str = "-proxy";
pub const GATEWAY_SERVICE_SUFFIX: &str = "-proxy-svc";
