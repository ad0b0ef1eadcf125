mod batch;
mod pool;
mod store;
mod support;
