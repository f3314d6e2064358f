// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
pub mod admission;
pub mod api;
pub mod cluster;
pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod kubernetes;
pub mod observer;
pub mod persist;
pub mod registry;
pub mod types;
pub mod usage;

#[cfg(test)]
pub mod test_utils;
