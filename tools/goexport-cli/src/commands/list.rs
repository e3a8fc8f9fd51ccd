//! Catalog listings.

use goexport_project_model::resolution::AspectRatio;
use goexport_project_model::service::visible_services;

pub fn services() -> anyhow::Result<()> {
    println!("{:<8} {:<22} {}", "KEY", "NAME", "REQUIRES");
    for service in visible_services() {
        let requires: Vec<&str> = service.requires.iter().map(|id| id.label()).collect();
        println!("{:<8} {:<22} {}", service.key, service.name, requires.join(", "));
    }
    Ok(())
}

pub fn resolutions() -> anyhow::Result<()> {
    for aspect in AspectRatio::ALL {
        let marker = if aspect == AspectRatio::DEFAULT { " (default)" } else { "" };
        println!("{aspect}{marker}");
        for resolution in aspect.resolutions() {
            let note = if resolution.exceeds_recommended() { "  may record unreliably" } else { "" };
            println!("  {resolution}{note}");
        }
    }
    Ok(())
}
