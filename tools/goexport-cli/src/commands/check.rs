//! Check tools, display, OBS and services.

use goexport_capture_engine::ObsClient;
use goexport_common::config::AppConfig;
use goexport_export_flow::reachability::check_service;
use goexport_export_flow::HttpProbe;
use goexport_platform::display::{detect_display_server, detect_monitors, DisplayServer};
use goexport_project_model::service::visible_services;
use goexport_render_engine::command_exists;

pub async fn run(config: &AppConfig) -> anyhow::Result<()> {
    println!("GoExport System Check");
    println!("{}", "=".repeat(50));

    let tools = [
        ("ffmpeg", &config.tools.ffmpeg),
        ("ffprobe", &config.tools.ffprobe),
        ("chromedriver", &config.tools.chromedriver),
    ];
    let mut required_ok = true;
    for (name, path) in tools {
        if command_exists(path) {
            println!("[OK] {name}: {}", path.display());
        } else {
            required_ok = false;
            println!("[MISSING] {name}: {}", path.display());
        }
    }
    match &config.tools.flash_plugin {
        Some(plugin) if plugin.is_file() => println!("[OK] Plugin: {}", plugin.display()),
        Some(plugin) => println!("[WARN] Plugin not found at {}", plugin.display()),
        None => println!("[WARN] No plugin path configured"),
    }

    println!();
    match detect_display_server() {
        DisplayServer::X11 => println!("[OK] Display server: X11"),
        DisplayServer::Wayland => println!("[WARN] Display server: Wayland (native capture needs X11)"),
        DisplayServer::Windows => println!("[OK] Display server: Windows"),
        DisplayServer::Unknown => println!("[WARN] Display server: Unknown"),
    }
    match detect_monitors() {
        Ok(monitors) => {
            for m in &monitors {
                println!(
                    "     {} {}x{} @ {}Hz {}",
                    m.name,
                    m.width,
                    m.height,
                    m.refresh_rate_hz,
                    if m.primary { "(primary)" } else { "" }
                );
            }
        }
        Err(e) => println!("[WARN] Monitors: {e}"),
    }

    println!();
    match ObsClient::connect(&config.obs).await {
        Ok(_) => println!("[OK] OBS reachable at {}:{}", config.obs.host, config.obs.port),
        Err(e) => println!("[INFO] OBS not in use, native capture will be used ({e})"),
    }

    let probe = HttpProbe::new();
    for service in visible_services() {
        match check_service(&probe, service).await {
            Ok(()) => println!("[OK] {} reachable", service.name),
            Err(e) => println!("[WARN] {}: {e}", service.name),
        }
    }

    println!();
    if required_ok {
        println!("All required tools are available. GoExport is ready.");
    } else {
        println!("Some required tools are missing. See above.");
    }
    Ok(())
}
