use log::LevelFilter;

pub fn init_logger() {
    let _ = env_logger::builder()
        .filter_level(LevelFilter::Warn)
        .filter(Some("airbrake_sitl"), LevelFilter::Trace)
        .filter(Some("airbrake_guidance_core"), LevelFilter::Info)
        .is_test(true)
        .try_init();
}
