mod shaderlib;

use anyhow::Context;
use log::{info, warn};

use matforge::prelude::*;

const TEMPLATE: &str = "Templates/Material.hlsl";

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let orchestrator =
        BuildOrchestrator::open(BuildConfig::from_env()).context("Error opening shader caches")?;
    let config = orchestrator.config();
    let template = config.shader_root.join(TEMPLATE);
    let includes_changed = !orchestrator.is_shader_include_cached();

    let tonemap = config.shader_root.join("Post/Tonemap.hlsl");
    match orchestrator.compile_shader("Tonemap", &tonemap, "main", "ps_6_6", &[]) {
        Some(output) => info!("Tonemap: `{}`", output.display()),
        None => warn!("Tonemap failed to compile"),
    }

    let mut materials = shaderlib::presets();
    for entry in std::fs::read_dir(&config.materials_root)
        .into_iter()
        .flatten()
        .flatten()
    {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "mat") {
            materials.push(("file", Material::load(&path)));
        }
    }

    for (preset, material) in materials {
        let mut material = material.with_context(|| format!("Error building `{preset}`"))?;
        let name = material.logical_path().display().to_string();

        for defines in [&[][..], &["WITH_ALPHATEST"][..]] {
            match orchestrator.compile_material_shader(
                "ForwardPS",
                &template,
                "main",
                "ps_6_6",
                &mut material,
                defines,
            ) {
                Some(output) => info!("{name} {defines:?}: `{}`", output.display()),
                None => warn!("{name} {defines:?}: falling back to the default pixel shader"),
            }
        }

        log::debug!("{name}:\n{}", material.graph());
    }

    if includes_changed {
        let written = orchestrator.commit_include_set()?;
        info!("Committed {written} shared include(s)");
    }

    Ok(())
}
