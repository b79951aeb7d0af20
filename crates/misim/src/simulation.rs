//! Top-level wiring: builds a runnable simulation from an architecture
//! model and an experiment, and exposes run results.

use std::cell::RefCell;
use std::rc::Rc;

use misim_core::{Id, Simulation, SimulationContext};
use sugars::{rc, refcell};

use crate::architecture::{Architecture, ArchitectureError, ArchitectureModel};
use crate::events::{DelayEnd, DelayStart, KillInstances, StartInstances};
use crate::experiment::{ExperimentModel, ExperimentSettings};
use crate::faults::FaultDescription;
use crate::generator::{ArrivalSequence, LoadGenerator, LoadGeneratorDescription};
use crate::network::{DelayInjection, Network};
use crate::reporter::{DataPoint, MultiDataPointReporter, ReportSink};
use crate::request::{Request, RequestId, RequestRegistry};
use crate::service::Microservice;
use crate::stats::{RequestOutcome, WorkloadStats};

/// Success/failure counts of a finished run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunSummary {
    pub successful: u64,
    pub failed: u64,
    pub end_time: f64,
}

/// A fully wired microservice simulation.
///
/// The architecture is static for the run; workload and faults are
/// injected up front (or between manual stepping calls) and the run is
/// bounded by the experiment duration.
pub struct MicroserviceSimulation {
    sim: Simulation,
    arch: Rc<Architecture>,
    registry: Rc<RefCell<RequestRegistry>>,
    network: Rc<RefCell<Network>>,
    network_component: Id,
    sink: Rc<RefCell<ReportSink>>,
    stats: Rc<RefCell<WorkloadStats>>,
    services: Vec<Rc<RefCell<Microservice>>>,
    service_components: Vec<Id>,
    generators: Vec<Rc<RefCell<LoadGenerator>>>,
    client: Rc<RefCell<LoadGenerator>>,
    ctx: Rc<SimulationContext>,
    duration: f64,
}

impl MicroserviceSimulation {
    pub fn new(model: &ArchitectureModel, settings: ExperimentSettings) -> Result<Self, ArchitectureError> {
        let arch = Rc::new(model.resolve()?);
        let mut sim = Simulation::new(settings.seed);
        let sink = rc!(refcell!(ReportSink::default()));
        let registry = rc!(refcell!(RequestRegistry::new()));
        let stats = rc!(refcell!(WorkloadStats::default()));

        let network = rc!(refcell!(Network::new(&arch, sim.create_context("network"))?));
        let network_component = sim.add_handler("network", network.clone());

        let mut services = Vec::new();
        let mut service_components = Vec::new();
        for (id, spec) in arch.services.iter().enumerate() {
            let ctx = Rc::new(sim.create_context(&spec.name));
            let service = rc!(refcell!(Microservice::new(
                id,
                arch.clone(),
                registry.clone(),
                network.clone(),
                sink.clone(),
                ctx,
            )));
            let component = sim.add_handler(&spec.name, service.clone());
            network.borrow_mut().register_service(id, component);
            services.push(service);
            service_components.push(component);
        }
        // activate only after every service is routable
        for service in &services {
            service.borrow_mut().activate();
        }

        let client_ctx = Rc::new(sim.create_context("client"));
        let client = rc!(refcell!(LoadGenerator::new(
            "client".to_owned(),
            None,
            ArrivalSequence::empty(),
            arch.clone(),
            registry.clone(),
            network.clone(),
            stats.clone(),
            MultiDataPointReporter::new("G[client]_", sink.clone()),
            client_ctx,
        )));
        sim.add_handler("client", client.clone());

        let ctx = Rc::new(sim.create_context("experiment"));

        Ok(Self {
            sim,
            arch,
            registry,
            network,
            network_component,
            sink,
            stats,
            services,
            service_components,
            generators: Vec::new(),
            client,
            ctx,
            duration: settings.duration,
        })
    }

    /// Registers the generators and faults of an experiment model and
    /// adopts its duration.
    pub fn load_experiment(&mut self, model: &ExperimentModel) -> Result<(), ArchitectureError> {
        self.duration = model.duration;
        for generator in &model.generators {
            self.add_generator(generator)?;
        }
        for fault in &model.faults {
            self.add_fault(fault)?;
        }
        Ok(())
    }

    /// Creates and activates one load generator.
    pub fn add_generator(&mut self, desc: &LoadGeneratorDescription) -> Result<(), ArchitectureError> {
        let service = self.arch.service_by_name(&desc.service)?;
        let operation = self.arch.operation_by_name(service, &desc.operation)?;
        let name = if desc.name.is_empty() {
            format!("generator_{}", self.generators.len())
        } else {
            desc.name.clone()
        };
        let ctx = Rc::new(self.sim.create_context(&name));
        let generator = rc!(refcell!(LoadGenerator::new(
            name.clone(),
            Some(operation),
            ArrivalSequence::from_description(desc),
            self.arch.clone(),
            self.registry.clone(),
            self.network.clone(),
            self.stats.clone(),
            MultiDataPointReporter::new(format!("G[{}]_", name), self.sink.clone()),
            ctx,
        )));
        self.sim.add_handler(&name, generator.clone());
        generator.borrow_mut().activate();
        self.generators.push(generator);
        Ok(())
    }

    /// Schedules a single-shot fault.
    pub fn add_fault(&mut self, fault: &FaultDescription) -> Result<(), ArchitectureError> {
        let now = self.sim.time();
        match fault {
            FaultDescription::Kill { service, count, at } => {
                let service = self.arch.service_by_name(service)?;
                self.ctx.emit(
                    KillInstances { count: *count },
                    self.service_components[service],
                    (at - now).max(0.0),
                );
            }
            FaultDescription::Start { service, count, at } => {
                let service = self.arch.service_by_name(service)?;
                self.ctx.emit(
                    StartInstances { count: *count },
                    self.service_components[service],
                    (at - now).max(0.0),
                );
            }
            FaultDescription::Delay {
                service,
                baseline,
                std_dev,
                duration,
                at,
            } => {
                let service = match service {
                    Some(name) => Some(self.arch.service_by_name(name)?),
                    None => None,
                };
                let injection = self
                    .network
                    .borrow_mut()
                    .add_injection(DelayInjection::new(service, *baseline, *std_dev));
                self.ctx
                    .emit(DelayStart { injection }, self.network_component, (at - now).max(0.0));
                self.ctx.emit(
                    DelayEnd { injection },
                    self.network_component,
                    (at + duration - now).max(0.0),
                );
            }
        }
        Ok(())
    }

    /// Issues one ad-hoc external request towards `service.operation`.
    pub fn send_request(&mut self, service: &str, operation: &str) -> Result<RequestId, ArchitectureError> {
        let service = self.arch.service_by_name(service)?;
        let operation = self.arch.operation_by_name(service, operation)?;
        Ok(self.client.borrow_mut().send_to(operation))
    }

    /// Runs the simulation up to the experiment duration.
    pub fn run(&mut self) -> RunSummary {
        self.sim.step_until_time(self.duration);
        let stats = self.stats.borrow();
        RunSummary {
            successful: stats.successful,
            failed: stats.failed,
            end_time: self.sim.time(),
        }
    }

    /// Executes the next pending event.
    pub fn step(&mut self) -> bool {
        self.sim.step()
    }

    /// Steps until the given virtual time.
    pub fn step_until_time(&mut self, time: f64) -> bool {
        self.sim.step_until_time(time)
    }

    pub fn time(&self) -> f64 {
        self.sim.time()
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    /// All datapoints collected so far, in emission order.
    pub fn datapoints(&self) -> Vec<DataPoint> {
        self.sink.borrow().points().to_vec()
    }

    /// Datapoints of one series, in emission order.
    pub fn series(&self, name: &str) -> Vec<DataPoint> {
        self.sink.borrow().series(name).into_iter().cloned().collect()
    }

    /// Outcome of an externally issued request.
    pub fn outcome(&self, request: RequestId) -> RequestOutcome {
        self.stats.borrow().outcome(request)
    }

    /// Snapshot of a request's state in the registry.
    pub fn request(&self, request: RequestId) -> Request {
        self.registry.borrow().get(request).clone()
    }

    /// Total number of requests created so far, internal ones included.
    pub fn request_count(&self) -> usize {
        self.registry.borrow().len()
    }

    pub fn successful_requests(&self) -> u64 {
        self.stats.borrow().successful
    }

    pub fn failed_requests(&self) -> u64 {
        self.stats.borrow().failed
    }

    /// Number of instances of `service` currently accepting requests.
    pub fn running_instances(&self, service: &str) -> Result<usize, ArchitectureError> {
        let service = self.arch.service_by_name(service)?;
        Ok(self.services[service].borrow().running_instances())
    }

    /// Directly scales a service's instance pool, as a scaling fault or
    /// test harness would.
    pub fn scale_service(&mut self, service: &str, target: u32) -> Result<(), ArchitectureError> {
        let service = self.arch.service_by_name(service)?;
        self.services[service].borrow_mut().scale_to(target);
        Ok(())
    }
}
