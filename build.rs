use std::env;

fn main() {
    // The model is loaded at runtime; only warn when the default location is empty
    let model_path = "models/u2net.onnx";
    println!("cargo:rerun-if-changed={}", model_path);
    println!("cargo:rerun-if-env-changed=MODEL_PATH");

    match std::fs::metadata(model_path) {
        Ok(meta) => {
            println!(
                "cargo:warning=Found {} ({:.1} MB)",
                model_path,
                meta.len() as f64 / 1_048_576.0
            );
        }
        Err(_) if env::var("MODEL_PATH").is_err() => {
            println!(
                "cargo:warning=No model at {}. Download u2net.onnx there or set MODEL_PATH before running.",
                model_path
            );
        }
        Err(_) => {}
    }

    // Report enabled acceleration features
    let mut enabled_features = Vec::new();

    for (feature, name) in [
        ("CARGO_FEATURE_CUDA", "CUDA"),
        ("CARGO_FEATURE_TENSORRT", "TensorRT"),
        ("CARGO_FEATURE_DIRECTML", "DirectML"),
        ("CARGO_FEATURE_COREML", "CoreML"),
        ("CARGO_FEATURE_OPENVINO", "OpenVINO"),
        ("CARGO_FEATURE_XNNPACK", "XNNPACK"),
    ] {
        if env::var(feature).is_ok() {
            enabled_features.push(name);
        }
    }

    if enabled_features.is_empty() {
        println!("cargo:warning=Building with CPU-only inference (no GPU acceleration)");
    } else {
        println!("cargo:warning=Acceleration enabled: {}", enabled_features.join(", "));
    }

    let target = env::var("TARGET").unwrap_or_default();
    if target.contains("windows-gnu") && enabled_features.contains(&"CUDA") {
        println!("cargo:warning=CUDA binaries may not be available for Windows GNU target");
    }
}
