use sluice_runtime::local::local_agent;
use sluice_runtime::Runner;

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[tokio::main]
async fn main() {
    // The runner owns the log writer guard; drop it before exiting so
    // buffered log lines reach their destination.
    let code = {
        let mut runner = Runner::new(local_agent);
        runner.run(std::env::args_os().skip(1)).await
    };
    std::process::exit(code)
}
