use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, ensure};
use rhal_core::config::{DeviceConfig, RhalConfig};
use rhal_device::{BindableResource, GraphicsDevice, SoftwareDriver, SoftwareProfile};
use rhal_types::{
    BackendKind, BufferDescription, BufferUsage, MapMode, PixelFormat, TextureDescription,
    TextureRegion, TextureUsage,
};
use serde::Serialize;

const SECOND_NS: u64 = 1_000_000_000;

// ── Check result types ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Pass,
    Fail,
    Warn,
    Skip,
}

#[derive(Debug, Serialize)]
struct CheckResult {
    name: String,
    status: CheckStatus,
    message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    details: Vec<String>,
}

impl CheckResult {
    fn new(name: &str, status: CheckStatus, message: &str) -> Self {
        Self {
            name: name.to_string(),
            status,
            message: message.to_string(),
            details: Vec::new(),
        }
    }

    fn pass(name: &str, message: &str) -> Self {
        Self::new(name, CheckStatus::Pass, message)
    }

    fn fail(name: &str, message: &str) -> Self {
        Self::new(name, CheckStatus::Fail, message)
    }

    fn warn(name: &str, message: &str) -> Self {
        Self::new(name, CheckStatus::Warn, message)
    }

    fn skip(name: &str, message: &str) -> Self {
        Self::new(name, CheckStatus::Skip, message)
    }

    fn detail(mut self, detail: &str) -> Self {
        self.details.push(detail.to_string());
        self
    }
}

/// Outcome of one scenario: a summary line, or `None` when the scenario
/// does not apply to the profile.
type Scenario = fn(&Harness) -> anyhow::Result<Option<String>>;

const SCENARIOS: &[(&str, Scenario)] = &[
    ("Balanced mapping", balanced_mapping),
    ("Map misuse", map_misuse),
    ("Buffer round trip", buffer_round_trip),
    ("Texture round trip", texture_round_trip),
    ("Concurrent mapping", concurrent_mapping),
    ("Fence waits", fence_waits),
    ("Resource lifetimes", resource_lifetimes),
];

// ── Main entry point ────────────────────────────────────────────────────────

pub fn run_verify(config_path: &str, json: bool) -> anyhow::Result<()> {
    let mut results: Vec<CheckResult> = Vec::new();

    // Check 1: Configuration
    let rhal_config = check_config(config_path, &mut results).unwrap_or_default();

    // Check 2: Scenarios, per profile
    for backend in BackendKind::ALL {
        let profile = SoftwareProfile::from_config(backend, &rhal_config.software);
        let harness = Harness {
            profile,
            device_config: DeviceConfig {
                backend,
                ..rhal_config.device.clone()
            },
        };
        for (name, scenario) in SCENARIOS {
            results.push(run_scenario(name, &harness, *scenario));
        }
    }

    // Output
    if json {
        print_results_json(&results)?;
    } else {
        print_results_pretty(&results);
    }

    // Exit code 1 if any failures
    if results
        .iter()
        .any(|r| matches!(r.status, CheckStatus::Fail))
    {
        std::process::exit(1);
    }

    Ok(())
}

fn run_scenario(name: &str, harness: &Harness, scenario: Scenario) -> CheckResult {
    let label = format!("{} ({})", name, harness.profile.backend.name());
    let started = Instant::now();
    let outcome = scenario(harness);
    let elapsed = format!("took {:.1} ms", started.elapsed().as_secs_f64() * 1000.0);
    match outcome {
        Ok(Some(summary)) => CheckResult::pass(&label, &summary).detail(&elapsed),
        Ok(None) => CheckResult::skip(&label, "Not applicable to this driver profile"),
        Err(e) => {
            let mut result = CheckResult::fail(&label, &e.to_string());
            for cause in e.chain().skip(1) {
                result = result.detail(&format!("caused by: {}", cause));
            }
            result
        }
    }
}

// ── Check 1: Configuration ──────────────────────────────────────────────────

fn check_config(config_path: &str, results: &mut Vec<CheckResult>) -> Option<RhalConfig> {
    let path = std::path::Path::new(config_path);

    if !path.exists() {
        results.push(
            CheckResult::warn(
                "Configuration",
                &format!("Config file not found: {}", config_path),
            )
            .detail("Using default configuration"),
        );
        return None;
    }

    match RhalConfig::load(config_path) {
        Ok(config) => {
            let mut result = CheckResult::pass(
                "Configuration",
                &format!("Loaded from {}", config_path),
            );
            result = result.detail(&format!("Default backend: {}", config.device.backend.name()));
            result = result.detail(&format!("Debug names: {}", config.device.debug));
            result = result.detail(&format!("Wait pool limit: {}", config.device.wait_pool_limit));
            if let Some(alignment) = config.software.row_alignment {
                result = result.detail(&format!("Row alignment override: {} bytes", alignment));
            }
            if let Some(async_completion) = config.software.async_completion {
                result = result.detail(&format!("Async completion override: {}", async_completion));
            }
            results.push(result);
            Some(config)
        }
        Err(e) => {
            results.push(CheckResult::fail(
                "Configuration",
                &format!("Failed to parse {}: {}", config_path, e),
            ));
            None
        }
    }
}

// ── Check 2: Scenarios ──────────────────────────────────────────────────────

struct Harness {
    profile: SoftwareProfile,
    device_config: DeviceConfig,
}

impl Harness {
    /// A fresh driver and device, so counters start from zero.
    fn device(&self) -> anyhow::Result<(Arc<SoftwareDriver>, GraphicsDevice)> {
        let driver = Arc::new(SoftwareDriver::new(self.profile)?);
        let device = GraphicsDevice::new(driver.clone(), &self.device_config);
        Ok((driver, device))
    }
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn balanced_mapping(harness: &Harness) -> anyhow::Result<Option<String>> {
    let (driver, device) = harness.device()?;
    let buffer = device.create_buffer(&BufferDescription::new(256, BufferUsage::STAGING))?;

    for _ in 0..5 {
        device.map(&buffer, MapMode::Write, 0)?;
    }
    for i in 0..5 {
        device.unmap(&buffer, 0)?;
        let unmaps = driver.stats().native_unmaps;
        if i < 4 {
            ensure!(unmaps == 0, "native unmap after {} of 5 unmaps", i + 1);
        }
    }

    let stats = driver.stats();
    ensure!(
        stats.native_maps == 1 && stats.native_unmaps == 1,
        "expected 1 native map/unmap, got {}/{}",
        stats.native_maps,
        stats.native_unmaps
    );
    Ok(Some("5 maps share one native mapping".to_string()))
}

fn map_misuse(harness: &Harness) -> anyhow::Result<Option<String>> {
    let (_driver, device) = harness.device()?;
    let buffer = device.create_buffer(&BufferDescription::new(64, BufferUsage::STAGING))?;

    match device.unmap(&buffer, 0) {
        Err(e) if e.is_usage() => {}
        other => bail!("unmap without map: expected usage error, got {:?}", other),
    }

    device.map(&buffer, MapMode::Write, 0)?;
    let conflict = device.map(&buffer, MapMode::Read, 0);
    device.unmap(&buffer, 0)?;
    match conflict {
        Err(e) if e.is_usage() => {}
        other => bail!("mode conflict: expected usage error, got {:?}", other.map(|m| m.mode)),
    }
    ensure!(device.mapped_count() == 0, "mapping left behind");
    Ok(Some("unbalanced unmap and mode conflict rejected".to_string()))
}

fn buffer_round_trip(harness: &Harness) -> anyhow::Result<Option<String>> {
    let (_driver, device) = harness.device()?;
    let buffer = device.create_buffer(&BufferDescription::new(2048, BufferUsage::STAGING))?;
    let data = pattern(600);
    device.update_buffer(&buffer, 0, &data)?;

    let fence = device.create_fence(false);
    let mut list = device.create_command_list();
    list.begin();
    list.end()?;
    device.submit_commands(&list, Some(&fence))?;
    ensure!(device.wait_for_fence(&fence, SECOND_NS)?, "fence not signaled within 1s");

    let mapped = device.map(&buffer, MapMode::Read, 0)?;
    let mut readback = vec![0u8; data.len()];
    let read = device.read_mapped(&mapped, 0, &mut readback);
    device.unmap(&buffer, 0)?;
    read?;
    ensure!(readback == data, "mapped contents differ from the uploaded pattern");
    Ok(Some("600 bytes survived update, submit and map".to_string()))
}

fn texture_round_trip(harness: &Harness) -> anyhow::Result<Option<String>> {
    let (driver, device) = harness.device()?;
    let format = PixelFormat::R8G8B8A8Unorm;
    let region = TextureRegion {
        x: 4,
        y: 2,
        z: 0,
        width: 20,
        height: 4,
        depth: 1,
        mip_level: 0,
        array_layer: 0,
    };
    let data = pattern(20 * 4 * 4);

    let staging = device.create_texture(&TextureDescription::texture_2d(32, 8, 1, 1, format, TextureUsage::STAGING))?;
    device.update_texture(&staging, &data, &region)?;
    let mapped = device.map(&staging, MapMode::Read, 0)?;
    let mut image = vec![0u8; mapped.size_in_bytes as usize];
    let read = device.read_mapped(&mapped, 0, &mut image);
    device.unmap(&staging, 0)?;
    read?;

    let pitch = mapped.row_pitch as usize;
    let touched: usize = image.iter().filter(|&&b| b != 0).count();
    let expected: usize = data.iter().filter(|&&b| b != 0).count();
    for row in 0..4 {
        let start = (row + 2) * pitch + 16;
        ensure!(
            image[start..start + 80] == data[row * 80..(row + 1) * 80],
            "row {} differs through a {}-byte pitch",
            row,
            pitch
        );
    }
    ensure!(touched == expected, "bytes outside the region were written");

    let sampled = device.create_texture(&TextureDescription::texture_2d(32, 8, 1, 1, format, TextureUsage::SAMPLED))?;
    device.update_texture(&sampled, &data, &region)?;
    device.wait_for_idle();
    ensure!(
        driver.read_texture(sampled.native(), &region)? == data,
        "sampled texture contents differ"
    );

    let path = if device.capabilities().direct_texture_updates {
        "direct"
    } else {
        "staged"
    };
    Ok(Some(format!("{}-byte row pitch, {} upload path", pitch, path)))
}

fn concurrent_mapping(harness: &Harness) -> anyhow::Result<Option<String>> {
    let (driver, device) = harness.device()?;
    let buffer = device.create_buffer(&BufferDescription::new(1024, BufferUsage::STAGING))?;

    let outcomes: Vec<anyhow::Result<()>> = std::thread::scope(|scope| {
        let workers: Vec<_> = (0..2)
            .map(|_| {
                scope.spawn(|| -> anyhow::Result<()> {
                    for _ in 0..100 {
                        device.map(&buffer, MapMode::Write, 0)?;
                        device.unmap(&buffer, 0)?;
                    }
                    Ok(())
                })
            })
            .collect();
        workers
            .into_iter()
            .map(|w| w.join().unwrap_or_else(|_| Err(anyhow::anyhow!("mapping thread panicked"))))
            .collect()
    });
    for outcome in outcomes {
        outcome?;
    }

    let stats = driver.stats();
    ensure!(device.mapped_count() == 0, "buffer still mapped");
    ensure!(
        stats.native_maps == stats.native_unmaps,
        "{} native maps vs {} native unmaps",
        stats.native_maps,
        stats.native_unmaps
    );
    Ok(Some(format!("200 maps, {} native", stats.native_maps)))
}

fn fence_waits(harness: &Harness) -> anyhow::Result<Option<String>> {
    if !harness.profile.async_completion {
        return Ok(None);
    }
    let (driver, device) = harness.device()?;
    driver.pause();

    let fence = device.create_fence(false);
    let other = device.create_fence(false);
    let mut list = device.create_command_list();
    list.begin();
    list.end()?;
    device.submit_commands(&list, Some(&fence))?;

    let early = device.wait_for_fence(&fence, 10_000_000);
    driver.resume();
    ensure!(!early?, "fence signaled while the worker was paused");
    ensure!(device.wait_for_fence(&fence, SECOND_NS)?, "fence not signaled after resume");

    let fences = [fence, other];
    ensure!(device.wait_for_fences(&fences, false, 0)?, "wait-any missed the signaled fence");
    ensure!(!device.wait_for_fences(&fences, true, 1_000_000)?, "wait-all ignored the unsignaled fence");
    Ok(Some("timeout, wait-any and wait-all behave".to_string()))
}

fn resource_lifetimes(harness: &Harness) -> anyhow::Result<Option<String>> {
    let (driver, device) = harness.device()?;
    let buffer = device.create_buffer(&BufferDescription::new(64, BufferUsage::UNIFORM))?;
    let texture = device.create_texture(&TextureDescription::texture_2d(
        8,
        8,
        1,
        1,
        PixelFormat::R8Unorm,
        TextureUsage::SAMPLED,
    ))?;
    let natives = [buffer.native(), texture.native()];
    let set = device.create_resource_set(&[BindableResource::from(&buffer), BindableResource::from(&texture)])?;

    drop(buffer);
    drop(texture);
    ensure!(
        natives.iter().all(|&n| driver.contains(n)),
        "constituent destroyed while its resource set was alive"
    );
    drop(set);
    device.wait_for_idle();
    ensure!(
        natives.iter().all(|&n| !driver.contains(n)),
        "constituent leaked after its resource set was destroyed"
    );

    let violations = driver.stats().lifetime_violations;
    ensure!(violations == 0, "{} object(s) destroyed while in use", violations);
    Ok(Some("resource set held its bindings".to_string()))
}

// ── Output ──────────────────────────────────────────────────────────────────

fn print_results_pretty(results: &[CheckResult]) {
    println!();
    println!("RHAL Self-Check");
    println!("===============");
    println!("  Platform: {}", rhal_common::platform_name());
    println!();

    let mut pass_count = 0u32;
    let mut fail_count = 0u32;
    let mut warn_count = 0u32;

    for result in results {
        let (icon, color_start, color_end) = match result.status {
            CheckStatus::Pass => {
                pass_count += 1;
                ("[PASS]", "\x1b[32m", "\x1b[0m")
            }
            CheckStatus::Fail => {
                fail_count += 1;
                ("[FAIL]", "\x1b[31m", "\x1b[0m")
            }
            CheckStatus::Warn => {
                warn_count += 1;
                ("[WARN]", "\x1b[33m", "\x1b[0m")
            }
            CheckStatus::Skip => ("[SKIP]", "\x1b[90m", "\x1b[0m"),
        };

        println!(
            "  {}{}{} {} - {}",
            color_start, icon, color_end, result.name, result.message
        );

        for detail in &result.details {
            println!("         {}", detail);
        }
    }

    println!();
    println!("-------------------------------");
    println!(
        "  {} passed, {} failed, {} warnings",
        pass_count, fail_count, warn_count
    );
    println!();
}

fn print_results_json(results: &[CheckResult]) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string(results)?);
    Ok(())
}
