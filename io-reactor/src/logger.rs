use std::io::Write;

use env_logger::{Builder, Env};

/// This function configures the logging format. The loglevel is also
/// processed here i.e `RUST_LOG=io_reactor=TRACE` will print all trace!()
/// and higher messages to the console.
///
/// Records are tagged with the module path they originate from; reactor
/// messages carry the core id in the message itself, so file and line are
/// not repeated here.
pub fn init(level: &str) {
    let mut builder =
        Builder::from_env(Env::default().default_filter_or(level.to_string()));

    builder.format(|buf, record| {
        let mut level_style = buf.default_level_style(record.level());
        level_style.set_intense(true);
        writeln!(
            buf,
            "[{} {} {}] {}",
            buf.timestamp_nanos(),
            level_style.value(record.level()),
            record.target(),
            record.args()
        )
    });
    builder.init();
}
