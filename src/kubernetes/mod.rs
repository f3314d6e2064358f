// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Kubernetes backend: API discovery, object conversion and the kube-backed cluster client.

pub mod client;
pub mod convert;
pub mod discovery;

pub use client::KubeCluster;
pub use discovery::wait_for_api_groups;
