//! Controller information, temperature and VCOM commands.

use anyhow::Result;
use console::style;
use dialoguer::Confirm;
use usec::{SystemInfo, VCOM_RANGE_MV};

use crate::config::Config;
use crate::{Cli, CliError, open_device};

/// Render a VCOM magnitude as the negative voltage the panel sees.
fn format_vcom(millivolts: u16) -> String {
    format!("-{}.{:02} V", millivolts / 1000, (millivolts % 1000) / 10)
}

fn system_info_json(info: &SystemInfo) -> serde_json::Value {
    serde_json::json!({
        "width": info.width,
        "height": info.height,
        "firmware": info.version_string(),
        "signature_valid": info.has_valid_signature(),
        "image_buffer_addr": format!("0x{:08X}", info.image_buffer_addr),
        "update_buffer_addr": format!("0x{:08X}", info.update_buffer_addr),
        "image_buffer_count": info.image_buffer_count,
        "mode_count": info.mode_count,
        "temperature_segments": info.temperature_segments,
    })
}

fn print_json(data: serde_json::Value) -> Result<()> {
    let output = serde_json::json!({
        "ok": true,
        "data": data,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Info command implementation.
pub(crate) fn cmd_info(cli: &Cli, config: &Config, json: bool) -> Result<()> {
    let device = open_device(cli, config)?;
    let info = device.system_info().clone();
    let inquiry = device
        .inquiry_data()
        .cloned();
    device.close();

    if json {
        let mut data = system_info_json(&info);
        if let Some(inquiry) = &inquiry {
            data["vendor"] = serde_json::json!(inquiry.vendor);
            data["product"] = serde_json::json!(inquiry.product);
            data["revision"] = serde_json::json!(inquiry.revision);
        }
        return print_json(data);
    }

    eprintln!(
        "{}",
        style("Controller Information")
            .bold()
            .underlined()
    );
    if let Some(inquiry) = &inquiry {
        eprintln!(
            "  Device:         {} {} (rev {})",
            inquiry.vendor,
            style(&inquiry.product).green(),
            inquiry.revision
        );
    }
    eprintln!(
        "  Panel:          {}",
        style(format!("{}x{}", info.width, info.height)).cyan()
    );
    eprintln!("  Firmware:       {}", info.version_string());
    if !info.has_valid_signature() {
        eprintln!(
            "  Signature:      {}",
            style(format!("0x{:08X} (unexpected)", info.signature)).yellow()
        );
    }
    eprintln!("  Image buffer:   0x{:08X}", info.image_buffer_addr);
    eprintln!("  Update buffer:  0x{:08X}", info.update_buffer_addr);
    eprintln!("  Waveform modes: {}", info.mode_count);

    Ok(())
}

/// Temperature command implementation.
pub(crate) fn cmd_temp(cli: &Cli, config: &Config, json: bool) -> Result<()> {
    let mut device = open_device(cli, config)?;
    let celsius = device.get_temperature()?;
    device.close();

    if json {
        return print_json(serde_json::json!({ "celsius": celsius }));
    }
    eprintln!(
        "{} Panel temperature: {}",
        style("🌡").cyan(),
        style(format!("{celsius} °C")).bold()
    );
    Ok(())
}

/// VCOM command implementation: read, or program with `set`.
pub(crate) fn cmd_vcom(
    cli: &Cli,
    config: &Config,
    set: Option<u16>,
    yes: bool,
    json: bool,
) -> Result<()> {
    let Some(millivolts) = set else {
        let mut device = open_device(cli, config)?;
        let current = device.get_vcom()?;
        device.close();

        if json {
            return print_json(serde_json::json!({
                "millivolts": current,
                "volts": format_vcom(current),
            }));
        }
        eprintln!(
            "{} VCOM: {} ({current} mV)",
            style("⚡").cyan(),
            style(format_vcom(current)).bold()
        );
        return Ok(());
    };

    if !VCOM_RANGE_MV.contains(&millivolts) {
        return Err(CliError::Usage(format!(
            "VCOM {millivolts} mV is outside {}..={} mV",
            VCOM_RANGE_MV.start(),
            VCOM_RANGE_MV.end()
        ))
        .into());
    }

    if !yes {
        if cli.non_interactive {
            return Err(CliError::Usage(
                "Refusing to program VCOM without --yes in non-interactive mode".to_string(),
            )
            .into());
        }
        let proceed = Confirm::new()
            .with_prompt(format!(
                "Program VCOM to {} ({millivolts} mV)? A wrong value degrades image quality",
                format_vcom(millivolts)
            ))
            .default(false)
            .interact()?;
        if !proceed {
            return Err(CliError::Cancelled("VCOM left unchanged".to_string()).into());
        }
    }

    let mut device = open_device(cli, config)?;
    let previous = device.get_vcom()?;
    device.set_vcom(millivolts)?;
    let current = device.get_vcom()?;
    device.close();

    if json {
        return print_json(serde_json::json!({
            "previous_millivolts": previous,
            "millivolts": current,
            "volts": format_vcom(current),
        }));
    }
    if !cli.quiet {
        eprintln!(
            "{} VCOM {} -> {}",
            style("✓")
                .green()
                .bold(),
            format_vcom(previous),
            style(format_vcom(current)).bold()
        );
    }
    if current != millivolts {
        log::warn!("Controller reports {current} mV after setting {millivolts} mV");
    }
    Ok(())
}
