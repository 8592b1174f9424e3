//! End-to-end scenarios over the simulated cluster.
