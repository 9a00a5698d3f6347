//! Particle Lenia viewer. Takes an optional preset path.

use lenia_gpu::Viewer;

fn main() {
    env_logger::init();

    let mut builder = Viewer::builder();
    if let Some(preset) = std::env::args().nth(1) {
        builder = builder.with_preset(preset);
    }

    if let Err(e) = builder.build().run() {
        log::error!("{e}");
        std::process::exit(1);
    }
}
