//! Cluster-free stand-ins used by `--dev`.

pub mod events;
