fn main() {
    if let Err(error) = t2o_app::run_from_env() {
        tracing::error!("{error:#}");
        std::process::exit(1);
    }
}
