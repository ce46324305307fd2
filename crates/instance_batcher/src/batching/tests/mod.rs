//! Frame-level batching scenarios driven through the headless device
