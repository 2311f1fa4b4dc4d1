//! Upload and refresh command implementations.

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::path::Path;
use usec::{Region, UpdateMode};

use crate::config::Config;
use crate::{
    AreaArgs, Cli, CliError, Controller, RefreshArgs, open_device, use_fancy_output,
    was_interrupted,
};

fn ensure_not_interrupted() -> Result<()> {
    if was_interrupted() {
        Err(CliError::Cancelled("Interrupted by user".to_string()).into())
    } else {
        Ok(())
    }
}

/// Check a raw image file against the geometry it is supposed to have.
fn check_image_len(len: usize, area: Region) -> Result<()> {
    if area.is_empty() {
        return Err(CliError::Usage(format!("Image area {area} is empty")).into());
    }
    if len != area.pixel_count() {
        return Err(CliError::Usage(format!(
            "Image is {len} bytes but {}x{} needs {} bytes (8 bpp)",
            area.width,
            area.height,
            area.pixel_count()
        ))
        .into());
    }
    Ok(())
}

fn upload_progress_bar(cli: &Cli) -> ProgressBar {
    if cli.quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(0);
    #[allow(clippy::unwrap_used)] // Static template string
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} blocks {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
    pb
}

/// Upload `pixels` to `area` with a progress bar.
fn upload(cli: &Cli, device: &mut Controller, pixels: &[u8], area: Region) -> Result<()> {
    let pb = upload_progress_bar(cli);
    pb.set_message(format!("{area}"));

    let result = device.image_upload_with_progress(
        pixels,
        area.x,
        area.y,
        area.width,
        area.height,
        |done, total| {
            pb.set_length(total as u64);
            pb.set_position(done as u64);
        },
    );

    match result {
        Ok(()) => {
            pb.finish_and_clear();
            if !cli.quiet {
                eprintln!(
                    "{} Uploaded {}",
                    style("✓")
                        .green()
                        .bold(),
                    style(area).cyan()
                );
            }
            Ok(())
        },
        Err(e) => {
            pb.abandon();
            Err(anyhow::Error::new(e).context(format!("Upload of {area} failed")))
        },
    }
}

/// Refresh `area` and report.
fn refresh(
    cli: &Cli,
    device: &mut Controller,
    area: Region,
    mode: UpdateMode,
    wait_ready: bool,
) -> Result<()> {
    ensure_not_interrupted()?;
    device
        .image_update(area, mode, wait_ready)
        .with_context(|| format!("Refresh of {area} with {mode} failed"))?;
    if !cli.quiet {
        let what = if wait_ready { "Refreshed" } else { "Started refresh of" };
        eprintln!(
            "{} {what} {} ({})",
            style("✓")
                .green()
                .bold(),
            style(area).cyan(),
            style(mode).yellow()
        );
    }
    Ok(())
}

/// Clear command implementation.
pub(crate) fn cmd_clear(cli: &Cli, config: &Config, wait_ready: bool) -> Result<()> {
    let mut device = open_device(cli, config)?;
    let full = device.full_region();
    refresh(cli, &mut device, full, UpdateMode::Init, wait_ready && config.wait_ready())?;
    device.close();
    Ok(())
}

/// Show command implementation.
pub(crate) fn cmd_show(
    cli: &Cli,
    config: &Config,
    file: &Path,
    area: Region,
    refresh_args: &RefreshArgs,
    no_update: bool,
) -> Result<()> {
    let pixels =
        fs::read(file).with_context(|| format!("Failed to read image {}", file.display()))?;
    check_image_len(pixels.len(), area)?;

    let mut device = open_device(cli, config)?;
    upload(cli, &mut device, &pixels, area)?;
    if !no_update {
        refresh(
            cli,
            &mut device,
            area,
            refresh_args.resolve_mode(config),
            refresh_args.wait_ready(config),
        )?;
    }
    device.close();
    Ok(())
}

/// Fill command implementation.
pub(crate) fn cmd_fill(
    cli: &Cli,
    config: &Config,
    level: u8,
    area: &AreaArgs,
    refresh_args: &RefreshArgs,
) -> Result<()> {
    let mut device = open_device(cli, config)?;
    let region = area.region(device.width(), device.height());
    if region.is_empty() {
        return Err(CliError::Usage(format!("Fill area {region} is empty")).into());
    }

    let pixels = vec![level; region.pixel_count()];
    upload(cli, &mut device, &pixels, region)?;
    refresh(
        cli,
        &mut device,
        region,
        refresh_args.resolve_mode(config),
        refresh_args.wait_ready(config),
    )?;
    device.close();
    Ok(())
}

/// Update command implementation.
pub(crate) fn cmd_update(
    cli: &Cli,
    config: &Config,
    area: &AreaArgs,
    refresh_args: &RefreshArgs,
) -> Result<()> {
    let mut device = open_device(cli, config)?;
    let region = area.region(device.width(), device.height());
    refresh(
        cli,
        &mut device,
        region,
        refresh_args.resolve_mode(config),
        refresh_args.wait_ready(config),
    )?;
    device.close();
    Ok(())
}
