//! Architecture description and its resolved in-memory form.
//!
//! The description structs mirror the shape of an architecture file and
//! are produced by an external parser. [`ArchitectureModel::resolve`]
//! turns the name-based description into dense-id tables; all further
//! references between services, operations and dependencies are id
//! edges.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Index of a service in the resolved architecture.
pub type ServiceId = usize;
/// Global index of an operation in the resolved architecture.
pub type OperationId = usize;
/// Per-service instance number, unique for the lifetime of a run.
pub type InstanceId = u64;

fn default_probability() -> f64 {
    1.0
}

/// Description of a whole architecture: services plus network settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchitectureModel {
    pub services: Vec<ServiceDescription>,
    #[serde(default)]
    pub network: NetworkConfig,
}

/// Description of one microservice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceDescription {
    pub name: String,
    /// CPU capacity of each instance, in work units per unit of time.
    pub capacity: f64,
    /// Initial instance count.
    pub instances: u32,
    #[serde(default)]
    pub patterns: Vec<PatternDescription>,
    pub operations: Vec<OperationDescription>,
}

/// Description of one operation of a service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationDescription {
    pub name: String,
    /// CPU demand of one invocation, in work units.
    pub demand: f64,
    #[serde(default)]
    pub dependencies: Vec<DependencyDescription>,
}

/// A declared call from one operation to an operation of another service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyDescription {
    pub service: String,
    pub operation: String,
    /// Probability that a given request actually exercises this
    /// dependency.
    #[serde(default = "default_probability")]
    pub probability: f64,
}

/// Resilience pattern attached to a service or its instances.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PatternDescription {
    Retry(RetryConfig),
    CircuitBreaker(CircuitBreakerConfig),
    LoadBalancer { strategy: BalancingStrategy },
    Autoscaler(AutoscalerConfig),
}

/// Retry with exponential backoff, applied to outgoing dependency
/// requests of every instance of the service.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total number of tries, the initial send included.
    pub max_attempts: u32,
    pub base_backoff: f64,
    pub max_backoff: f64,
    /// Upper bound of the uniform jitter added to each backoff.
    pub jitter: f64,
}

/// Circuit breaker guarding outgoing requests, tracked per target
/// service.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Number of most recent outcomes considered.
    pub rolling_window: usize,
    /// Failure fraction of a full window that trips the circuit.
    pub failure_rate_threshold: f64,
    /// Maximum number of in-flight requests to one target before sends
    /// are refused with `RequestVolumeReached`.
    pub request_volume_threshold: usize,
    /// How long the circuit stays open before admitting a probe.
    pub break_duration: f64,
}

/// Load balancing strategy of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalancingStrategy {
    RoundRobin,
    Random,
    LeastUtilized,
}

/// Periodic demand-driven scaling of the instance pool.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AutoscalerConfig {
    pub period: f64,
    pub low_watermark: f64,
    pub high_watermark: f64,
    pub min_instances: u32,
    pub max_instances: u32,
    /// Minimum time between two scaling adjustments.
    #[serde(default)]
    pub cooldown: f64,
}

/// Network latency and timeout settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Latency applied to any pair without an explicit override,
    /// external requesters included.
    #[serde(default)]
    pub default_latency: f64,
    /// Timeout of the request leg, from send to arrival at the target.
    #[serde(default = "NetworkConfig::default_timeout")]
    pub default_timeout: f64,
    #[serde(default)]
    pub latencies: Vec<LatencyOverride>,
}

/// Latency override for one directed service pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatencyOverride {
    pub from: String,
    pub to: String,
    pub latency: f64,
}

impl NetworkConfig {
    fn default_timeout() -> f64 {
        8.0
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            default_latency: 0.0,
            default_timeout: Self::default_timeout(),
            latencies: Vec::new(),
        }
    }
}

/// Errors produced while resolving an architecture description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchitectureError {
    DuplicateService(String),
    UnknownService(String),
    UnknownOperation(String),
}

impl fmt::Display for ArchitectureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchitectureError::DuplicateService(name) => write!(f, "duplicate service '{}'", name),
            ArchitectureError::UnknownService(name) => write!(f, "unknown service '{}'", name),
            ArchitectureError::UnknownOperation(name) => write!(f, "unknown operation '{}'", name),
        }
    }
}

impl std::error::Error for ArchitectureError {}

/// Resolved form of one service.
#[derive(Debug, Clone)]
pub struct ServiceSpec {
    pub name: String,
    pub capacity: f64,
    pub initial_instances: u32,
    pub operations: Vec<OperationId>,
    pub retry: Option<RetryConfig>,
    pub circuit_breaker: Option<CircuitBreakerConfig>,
    pub balancing: BalancingStrategy,
    pub autoscaler: Option<AutoscalerConfig>,
}

/// Resolved form of one operation.
#[derive(Debug, Clone)]
pub struct OperationSpec {
    pub name: String,
    pub service: ServiceId,
    pub demand: f64,
    pub dependencies: Vec<DependencySpec>,
}

/// Resolved dependency edge.
#[derive(Debug, Clone, Copy)]
pub struct DependencySpec {
    pub service: ServiceId,
    pub operation: OperationId,
    pub probability: f64,
}

/// The resolved architecture: dense-id tables over services and
/// operations, static for the lifetime of a run.
#[derive(Debug, Clone)]
pub struct Architecture {
    pub services: Vec<ServiceSpec>,
    pub operations: Vec<OperationSpec>,
    pub network: NetworkConfig,
    service_names: HashMap<String, ServiceId>,
    operation_names: HashMap<(ServiceId, String), OperationId>,
}

impl ArchitectureModel {
    /// Resolves the description into dense-id tables, checking that all
    /// dependency targets exist.
    pub fn resolve(&self) -> Result<Architecture, ArchitectureError> {
        let mut service_names = HashMap::new();
        for (id, service) in self.services.iter().enumerate() {
            if service_names.insert(service.name.clone(), id).is_some() {
                return Err(ArchitectureError::DuplicateService(service.name.clone()));
            }
        }

        let mut operations = Vec::new();
        let mut operation_names = HashMap::new();
        let mut services = Vec::new();
        for (id, service) in self.services.iter().enumerate() {
            let mut op_ids = Vec::new();
            for op in &service.operations {
                let op_id = operations.len();
                operation_names.insert((id, op.name.clone()), op_id);
                op_ids.push(op_id);
                operations.push(OperationSpec {
                    name: op.name.clone(),
                    service: id,
                    demand: op.demand,
                    dependencies: Vec::new(),
                });
            }

            let mut spec = ServiceSpec {
                name: service.name.clone(),
                capacity: service.capacity,
                initial_instances: service.instances,
                operations: op_ids,
                retry: None,
                circuit_breaker: None,
                balancing: BalancingStrategy::RoundRobin,
                autoscaler: None,
            };
            for pattern in &service.patterns {
                match pattern {
                    PatternDescription::Retry(config) => spec.retry = Some(*config),
                    PatternDescription::CircuitBreaker(config) => spec.circuit_breaker = Some(*config),
                    PatternDescription::LoadBalancer { strategy } => spec.balancing = *strategy,
                    PatternDescription::Autoscaler(config) => spec.autoscaler = Some(*config),
                }
            }
            services.push(spec);
        }

        // second pass: dependency edges
        for (id, service) in self.services.iter().enumerate() {
            for op in &service.operations {
                let op_id = operation_names[&(id, op.name.clone())];
                for dep in &op.dependencies {
                    let target_service = *service_names
                        .get(&dep.service)
                        .ok_or_else(|| ArchitectureError::UnknownService(dep.service.clone()))?;
                    let target_op = *operation_names
                        .get(&(target_service, dep.operation.clone()))
                        .ok_or_else(|| ArchitectureError::UnknownOperation(dep.operation.clone()))?;
                    operations[op_id].dependencies.push(DependencySpec {
                        service: target_service,
                        operation: target_op,
                        probability: dep.probability,
                    });
                }
            }
        }

        Ok(Architecture {
            services,
            operations,
            network: self.network.clone(),
            service_names,
            operation_names,
        })
    }
}

impl Architecture {
    /// Looks up a service by name.
    pub fn service_by_name(&self, name: &str) -> Result<ServiceId, ArchitectureError> {
        self.service_names
            .get(name)
            .copied()
            .ok_or_else(|| ArchitectureError::UnknownService(name.to_owned()))
    }

    /// Looks up an operation of the given service by name.
    pub fn operation_by_name(&self, service: ServiceId, name: &str) -> Result<OperationId, ArchitectureError> {
        self.operation_names
            .get(&(service, name.to_owned()))
            .copied()
            .ok_or_else(|| ArchitectureError::UnknownOperation(name.to_owned()))
    }

    /// Looks up an operation by name across all services. Qualified
    /// `service.operation` names are resolved within the named service.
    pub fn find_operation(&self, name: &str) -> Result<OperationId, ArchitectureError> {
        if let Some((service, op)) = name.split_once('.') {
            let service = self.service_by_name(service)?;
            return self.operation_by_name(service, op);
        }
        for (id, op) in self.operations.iter().enumerate() {
            if op.name == name {
                return Ok(id);
            }
        }
        Err(ArchitectureError::UnknownOperation(name.to_owned()))
    }
}
