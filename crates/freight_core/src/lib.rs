//! # Freight Optimization Core
//!
//! Algorithmic core for the freight optimization engine.
//!
//! ## Overview
//!
//! This crate provides the building blocks the engine schedules work onto:
//!
//! - **Geo primitives**: Great-circle distance, bearings, polygons
//! - **Domain model**: Drivers, loads, positions and their lifecycles
//! - **Smart Hubs**: Spatially indexed hub catalogue, DBSCAN discovery,
//!   exchange-point selection
//! - **Network optimizer**: MIP-based load/driver assignment
//! - **Relay planner**: Multi-driver segmentation with hub-anchored handoffs
//! - **Predictor façade**: Uniform access to trained demand/supply/price models
//! - **Demand predictor**: Regional and lane forecasts, hotspots, trends
//!
//! ## Key Concepts
//!
//! - **Pure algorithms**: Nothing in this crate owns a thread; cancellation
//!   and progress are cooperative via callbacks threaded in by the caller
//! - **Repositories**: Drivers, loads and hubs live behind traits so any
//!   backing store honoring the index contracts is admissible
//! - **Deterministic**: Equal-objective solutions tie-break on empty-miles
//!   percentage and then lexicographic driver id

pub mod geo;
pub mod error;
pub mod control;
pub mod domain;
pub mod spatial;
pub mod hubs;
pub mod predict;
pub mod matching;
pub mod relay;
pub mod demand;
