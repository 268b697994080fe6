//! Cache command - manages the base image archive.

use anyhow::Result;

use isobox::cache::BaseImage;
use isobox::config::Config;
use isobox::timing::Timer;

/// Cache target for the cache command.
pub enum CacheTarget {
    /// Delete and build the base image again
    Rebuild,
    /// Delete the base image
    Clean,
}

/// Execute the cache command.
pub fn cmd_cache(target: CacheTarget, config: &Config) -> Result<()> {
    let image = BaseImage::from_config(config);
    match target {
        CacheTarget::Rebuild => {
            println!("Rebuilding base system cache...");
            if image.remove()? {
                println!("  Removed old cache: {}", image.path().display());
            }
            let timer = Timer::start("Base image");
            image.build(config)?;
            timer.finish();
        }
        CacheTarget::Clean => {
            if image.remove()? {
                println!("Removed {}", image.path().display());
            } else {
                println!("No cached base system at {}", image.path().display());
            }
        }
    }
    Ok(())
}
