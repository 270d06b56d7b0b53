use tokio::runtime::{Builder, Runtime};

pub(crate) fn new_runtime() -> Runtime {
    Builder::new_multi_thread().enable_all().build().unwrap()
}
