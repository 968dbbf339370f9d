mod batch;
mod georef;
mod zones;

pub use batch::*;
pub use georef::*;
pub use zones::*;

use crate::config::Opts;

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}
