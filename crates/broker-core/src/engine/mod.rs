//! Core broker engine that wires the services together.
//!
//! The engine owns one instance of every service, runs the background
//! sweeper, and exposes the services to the transport layer. Instances are
//! assembled by [`BrokerBuilder`] from pluggable storage and notifier
//! factories selected by configuration.

pub mod event_bus;

use crate::orders::OrderService;
use crate::state::OrderStateMachine;
use crate::sweeper::Sweeper;
use broker_account::AccountService;
use broker_catalog::CatalogService;
use broker_config::Config;
use broker_flows::{FlowCompletion, FlowEngine, FlowError};
use broker_ledger::LedgerService;
use broker_notify::{NotifyFactory, NotifyService};
use broker_storage::{StorageFactory, StorageService};
use broker_types::{format_minor, BrokerEvent, Clock, FlowEvent, FlowKind, SystemClock};
use event_bus::EventBus;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while building or running the engine.
#[derive(Debug, Error)]
pub enum EngineError {
	/// Error related to configuration issues.
	#[error("Configuration error: {0}")]
	Config(String),
	/// Error from one of the broker services.
	#[error("{0}")]
	Service(String),
}

/// Main broker engine holding the wired-up services.
pub struct BrokerEngine {
	/// Broker configuration.
	config: Config,
	/// Storage service for persisting state.
	storage: Arc<StorageService>,
	/// Account registry.
	accounts: Arc<AccountService>,
	/// Service catalog.
	catalog: Arc<CatalogService>,
	/// Escrow ledger.
	ledger: Arc<LedgerService>,
	/// Order lifecycle operations.
	orders: Arc<OrderService>,
	/// Conversation engine.
	flows: Arc<FlowEngine>,
	/// Best-effort notification delivery.
	notify: Arc<NotifyService>,
	/// Background sweeper for stale pending orders.
	sweeper: Arc<Sweeper>,
	/// Event bus for inter-service communication.
	event_bus: EventBus,
}

impl BrokerEngine {
	/// Runs the engine until interrupted.
	///
	/// The request path is driven externally through the service accessors;
	/// this loop only ticks the sweeper and waits for the shutdown signal.
	pub async fn run(&self) -> Result<(), EngineError> {
		let mut ticks =
			tokio::time::interval(Duration::from_secs(self.sweeper.interval_seconds()));
		// The first tick fires immediately; skip it so startup stays quiet.
		ticks.tick().await;

		loop {
			tokio::select! {
				_ = ticks.tick() => {
					self.sweeper.tick().await;
				}

				// Shutdown signal
				_ = tokio::signal::ctrl_c() => {
					break;
				}
			}
		}

		Ok(())
	}

	/// Starts a conversation flow and announces it on the event bus.
	pub async fn start_flow(&self, account_id: &str, kind: FlowKind) -> Result<String, FlowError> {
		let prompt = self.flows.start_flow(account_id, kind).await?;
		self.event_bus
			.publish(BrokerEvent::Flow(FlowEvent::Started {
				account_id: account_id.to_string(),
				kind,
			}))
			.ok();
		Ok(prompt)
	}

	/// Cancels any open conversation flow for the account.
	pub async fn cancel_flow(&self, account_id: &str) -> Result<(), FlowError> {
		let had_flow = self.flows.has_active(account_id).await?;
		self.flows.cancel_flow(account_id).await?;
		if had_flow {
			self.event_bus
				.publish(BrokerEvent::Flow(FlowEvent::Cancelled {
					account_id: account_id.to_string(),
				}))
				.ok();
		}
		Ok(())
	}

	/// Executes the completion action of a finished conversation flow.
	///
	/// Returns the confirmation message for the account that drove the
	/// flow. Domain failures come back as [`EngineError::Service`] carrying
	/// the user-facing message.
	pub async fn run_completion(&self, completion: FlowCompletion) -> Result<String, EngineError> {
		let (account_id, kind) = match &completion {
			FlowCompletion::NewService { provider_id, .. } => {
				(provider_id.clone(), FlowKind::NewService)
			}
			FlowCompletion::NewOrder { requester_id, .. } => {
				(requester_id.clone(), FlowKind::NewOrder)
			}
			FlowCompletion::EditProfile { account_id, .. } => {
				(account_id.clone(), FlowKind::EditProfile)
			}
			FlowCompletion::ReportProblem { account_id, .. } => {
				(account_id.clone(), FlowKind::ReportProblem)
			}
		};
		let reply = match completion {
			FlowCompletion::NewService {
				provider_id,
				name,
				category,
				price_minor,
				duration_min,
				description,
			} => {
				let provider = self
					.accounts
					.get(&provider_id)
					.await
					.map_err(|e| EngineError::Service(e.to_string()))?;
				let service = self
					.catalog
					.create_service(
						&provider,
						&name,
						category,
						price_minor,
						duration_min,
						description,
					)
					.await
					.map_err(|e| EngineError::Service(e.to_string()))?;
				format!(
					"Service '{}' created at {}.",
					service.name,
					format_minor(service.price_minor, &self.config.orders.currency)
				)
			}
			FlowCompletion::NewOrder {
				requester_id,
				service_id,
				details,
			} => {
				let order = self
					.orders
					.create(&requester_id, &service_id, details.as_deref())
					.await
					.map_err(|e| EngineError::Service(e.to_string()))?;
				format!(
					"Order {} placed. Total {} (includes {} fee). The provider has been notified.",
					order.id,
					format_minor(order.total_minor, &order.currency),
					format_minor(order.fee_minor, &order.currency)
				)
			}
			FlowCompletion::EditProfile {
				account_id,
				display_name,
				about,
			} => {
				self.accounts
					.update_profile(&account_id, Some(display_name), about)
					.await
					.map_err(|e| EngineError::Service(e.to_string()))?;
				"Profile updated.".to_string()
			}
			FlowCompletion::ReportProblem {
				account_id,
				order_id,
				details,
			} => {
				self.orders
					.report_problem(&order_id, &account_id, &details)
					.await
					.map_err(|e| EngineError::Service(e.to_string()))?;
				"Thanks, your report was forwarded to the operators.".to_string()
			}
		};
		self.event_bus
			.publish(BrokerEvent::Flow(FlowEvent::Completed { account_id, kind }))
			.ok();
		Ok(reply)
	}

	/// Returns a reference to the configuration.
	pub fn config(&self) -> &Config {
		&self.config
	}

	/// Returns a reference to the storage service.
	pub fn storage(&self) -> &Arc<StorageService> {
		&self.storage
	}

	/// Returns a reference to the account registry.
	pub fn accounts(&self) -> &Arc<AccountService> {
		&self.accounts
	}

	/// Returns a reference to the service catalog.
	pub fn catalog(&self) -> &Arc<CatalogService> {
		&self.catalog
	}

	/// Returns a reference to the escrow ledger.
	pub fn ledger(&self) -> &Arc<LedgerService> {
		&self.ledger
	}

	/// Returns a reference to the order lifecycle service.
	pub fn orders(&self) -> &Arc<OrderService> {
		&self.orders
	}

	/// Returns a reference to the conversation engine.
	pub fn flows(&self) -> &Arc<FlowEngine> {
		&self.flows
	}

	/// Returns a reference to the notification service.
	pub fn notify(&self) -> &Arc<NotifyService> {
		&self.notify
	}

	/// Returns a reference to the background sweeper.
	pub fn sweeper(&self) -> &Arc<Sweeper> {
		&self.sweeper
	}

	/// Returns a reference to the event bus.
	pub fn event_bus(&self) -> &EventBus {
		&self.event_bus
	}
}

/// Builder for constructing a BrokerEngine with pluggable implementations.
///
/// Storage and notifier backends are created through factory functions
/// registered by name; the configuration's `primary` field selects which
/// factory is used.
pub struct BrokerBuilder {
	config: Config,
	storage_factories: HashMap<String, StorageFactory>,
	notify_factories: HashMap<String, NotifyFactory>,
	clock: Arc<dyn Clock>,
}

impl BrokerBuilder {
	/// Creates a new BrokerBuilder with the given configuration.
	pub fn new(config: Config) -> Self {
		Self {
			config,
			storage_factories: HashMap::new(),
			notify_factories: HashMap::new(),
			clock: Arc::new(SystemClock),
		}
	}

	/// Registers a factory for creating storage backends.
	///
	/// The name parameter should match an implementation name in the
	/// configuration.
	pub fn with_storage_factory(mut self, name: &str, factory: StorageFactory) -> Self {
		self.storage_factories.insert(name.to_string(), factory);
		self
	}

	/// Registers a factory for creating notifier transports.
	///
	/// The name parameter should match an implementation name in the
	/// configuration.
	pub fn with_notify_factory(mut self, name: &str, factory: NotifyFactory) -> Self {
		self.notify_factories.insert(name.to_string(), factory);
		self
	}

	/// Overrides the clock. Tests inject a manual clock here.
	pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
		self.clock = clock;
		self
	}

	/// Builds the BrokerEngine using the registered factories.
	pub fn build(self) -> Result<BrokerEngine, EngineError> {
		let storage_name = &self.config.storage.primary;
		let storage_config = self
			.config
			.storage
			.implementations
			.get(storage_name)
			.ok_or_else(|| {
				EngineError::Config(format!("Storage '{}' has no configuration", storage_name))
			})?;
		let storage_backend = self
			.storage_factories
			.get(storage_name)
			.ok_or_else(|| {
				EngineError::Config(format!("No factory registered for storage '{}'", storage_name))
			})?(storage_config)
		.map_err(|e| {
			EngineError::Config(format!(
				"Failed to create storage backend '{}': {}",
				storage_name, e
			))
		})?;
		let storage = Arc::new(StorageService::new(storage_backend));
		tracing::info!(component = "storage", implementation = %storage_name, "Loaded");

		let notify_name = &self.config.notify.primary;
		let notify_config = self
			.config
			.notify
			.implementations
			.get(notify_name)
			.ok_or_else(|| {
				EngineError::Config(format!("Notifier '{}' has no configuration", notify_name))
			})?;
		let notify_backend = self
			.notify_factories
			.get(notify_name)
			.ok_or_else(|| {
				EngineError::Config(format!("No factory registered for notifier '{}'", notify_name))
			})?(notify_config)
		.map_err(|e| {
			EngineError::Config(format!(
				"Failed to create notifier '{}': {}",
				notify_name, e
			))
		})?;
		let notify = Arc::new(NotifyService::new(notify_backend));
		tracing::info!(component = "notify", implementation = %notify_name, "Loaded");

		let clock = self.clock;
		let event_bus = EventBus::default();
		let accounts = Arc::new(AccountService::new(storage.clone(), clock.clone()));
		let catalog = Arc::new(CatalogService::new(storage.clone(), clock.clone()));
		let ledger = Arc::new(LedgerService::new(storage.clone(), clock.clone()));
		let state = Arc::new(OrderStateMachine::new(storage.clone(), clock.clone()));
		let orders = Arc::new(OrderService::new(
			state.clone(),
			accounts.clone(),
			catalog.clone(),
			ledger.clone(),
			notify.clone(),
			event_bus.clone(),
			clock.clone(),
			self.config.orders.clone(),
		));
		let flows = Arc::new(FlowEngine::new(
			storage.clone(),
			accounts.clone(),
			catalog.clone(),
			clock.clone(),
		));
		let sweeper = Arc::new(Sweeper::new(
			storage.clone(),
			state,
			orders.clone(),
			accounts.clone(),
			catalog.clone(),
			notify.clone(),
			event_bus.clone(),
			clock,
			self.config.sweeper.clone(),
		));
		tracing::info!(broker_id = %self.config.broker.id, "Assembled broker engine");

		Ok(BrokerEngine {
			config: self.config,
			storage,
			accounts,
			catalog,
			ledger,
			orders,
			flows,
			notify,
			sweeper,
			event_bus,
		})
	}
}
