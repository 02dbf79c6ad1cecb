//! The built-in dependency manifest and the shell scripts behind each
//! verify/install method.

use tether_common::config::{ProjectConfig, TetherConfig};
use tether_common::ssh::{quote, quote_path};
use tether_common::{DependencySpec, HostRole, InstallMethod, SizeClass, VerifyMethod};

/// System packages the audio stack needs: `(package, binary on PATH)`.
const SYSTEM_PACKAGES: &[(&str, Option<&str>)] = &[
    ("portaudio19-dev", None),
    ("python3-venv", None),
    ("ffmpeg", Some("ffmpeg")),
    ("espeak-ng", Some("espeak-ng")),
];

/// `(pip package, import name)`, audio and numeric libraries first.
const AUDIO_PACKAGES: &[(&str, &str)] = &[
    ("numpy", "numpy"),
    ("sounddevice", "sounddevice"),
    ("PyAudio", "pyaudio"),
    ("SpeechRecognition", "speech_recognition"),
    ("gTTS", "gtts"),
    ("pyttsx3", "pyttsx3"),
    ("playsound", "playsound"),
];

const ML_PACKAGES: &[(&str, &str)] = &[
    ("python-dotenv", "dotenv"),
    ("requests", "requests"),
    ("openai-whisper", "whisper"),
    ("langchain", "langchain"),
    ("duckduckgo-search", "duckduckgo_search"),
    ("open-interpreter", "interpreter"),
];

fn pip(group: &str, package: &str, module: &str) -> DependencySpec {
    DependencySpec {
        name: package.to_string(),
        version: None,
        group: group.to_string(),
        target: HostRole::Local,
        verify: VerifyMethod::Importable {
            module: module.to_string(),
        },
        install: InstallMethod::Pip {
            package: package.to_string(),
        },
        size: SizeClass::Small,
    }
}

/// Requirements of the assistant deployment, in install order.
pub fn default_manifest(config: &TetherConfig) -> Vec<DependencySpec> {
    let project = &config.project;
    let settings = config.assistant_settings();
    let mut specs = Vec::new();

    for (package, binary) in SYSTEM_PACKAGES {
        let verify = match binary {
            Some(binary) => VerifyMethod::PresentOnPath {
                binary: binary.to_string(),
            },
            None => VerifyMethod::Listed {
                command: format!("dpkg-query -W -f='${{Status}}' {package}"),
                needle: "install ok installed".to_string(),
            },
        };
        specs.push(DependencySpec {
            name: package.to_string(),
            version: None,
            group: "system-audio".to_string(),
            target: HostRole::Local,
            verify,
            install: InstallMethod::Apt {
                package: package.to_string(),
            },
            size: SizeClass::Small,
        });
    }

    specs.push(DependencySpec {
        name: "virtualenv".to_string(),
        version: None,
        group: "python-env".to_string(),
        target: HostRole::Local,
        verify: VerifyMethod::FileExists {
            path: project.venv_python().display().to_string(),
        },
        install: InstallMethod::Script {
            command: format!(
                "{} -m venv {} && {} -m pip install --upgrade pip",
                quote(&project.python),
                quote_path(&project.venv_dir()),
                quote_path(&project.venv_python()),
            ),
        },
        size: SizeClass::Small,
    });

    specs.extend(AUDIO_PACKAGES.iter().map(|(p, m)| pip("python-audio", p, m)));
    specs.extend(ML_PACKAGES.iter().map(|(p, m)| pip("python-ml", p, m)));

    let whisper = &settings.whisper_model;
    specs.push(DependencySpec {
        name: format!("whisper-{whisper}"),
        version: None,
        group: "speech-model".to_string(),
        target: HostRole::Local,
        verify: VerifyMethod::FileExists {
            path: format!("{}/{whisper}.pt", config.install.speech_model_cache.trim_end_matches('/')),
        },
        install: InstallMethod::Script {
            command: format!(
                "{} -c {}",
                quote_path(&project.venv_python()),
                quote(&format!("import whisper; whisper.load_model('{whisper}')"))
            ),
        },
        size: SizeClass::Large,
    });

    specs.push(DependencySpec {
        name: "ollama".to_string(),
        version: None,
        group: "remote-engine".to_string(),
        target: HostRole::Remote,
        verify: VerifyMethod::PresentOnPath {
            binary: "ollama".to_string(),
        },
        install: InstallMethod::Script {
            command: "curl -fsSL https://ollama.com/install.sh | sh".to_string(),
        },
        size: SizeClass::Small,
    });
    specs.push(DependencySpec {
        name: "ollama-service".to_string(),
        version: None,
        group: "remote-engine".to_string(),
        target: HostRole::Remote,
        verify: VerifyMethod::Listed {
            command: format!(
                "curl -fsS http://localhost:{}/api/tags",
                config.tunnel.remote_port
            ),
            needle: "models".to_string(),
        },
        install: InstallMethod::Script {
            command: "(systemctl --user start ollama 2>/dev/null || sudo -n systemctl start ollama 2>/dev/null || (nohup ollama serve >/dev/null 2>&1 &)) && sleep 3".to_string(),
        },
        size: SizeClass::Small,
    });

    for model in settings.required_models() {
        specs.push(DependencySpec {
            name: model.clone(),
            version: None,
            group: "remote-models".to_string(),
            target: HostRole::Remote,
            verify: VerifyMethod::Listed {
                command: "ollama list".to_string(),
                needle: model.clone(),
            },
            install: InstallMethod::OllamaPull { model },
            size: SizeClass::Large,
        });
    }

    specs
}

/// `~/rest` rendered so the target shell expands it.
pub(crate) fn shell_path(path: &str) -> String {
    match path.strip_prefix("~/") {
        Some(rest) => format!("\"$HOME\"/{}", quote(rest)),
        None => quote(path),
    }
}

/// Script whose success means the dependency is present. For
/// [`VerifyMethod::Listed`] the caller also looks for the needle in stdout.
/// A pinned importable package must also satisfy its version requirement.
pub fn verify_script(spec: &DependencySpec, project: &ProjectConfig) -> String {
    match &spec.verify {
        VerifyMethod::Importable { module } => {
            let program = match &spec.version {
                Some(requirement) => version_check(module, distribution(spec), requirement),
                None => format!("import {module}"),
            };
            format!("{} -c {}", quote_path(&project.venv_python()), quote(&program))
        }
        VerifyMethod::Listed { command, .. } => command.clone(),
        VerifyMethod::PresentOnPath { binary } => format!("command -v {}", quote(binary)),
        VerifyMethod::FileExists { path } => format!("test -e {}", shell_path(path)),
    }
}

/// Distribution name pip knows the package by.
fn distribution(spec: &DependencySpec) -> &str {
    match &spec.install {
        InstallMethod::Pip { package } => package,
        _ => &spec.name,
    }
}

/// Python program exiting 0 only when `module` imports and the installed
/// distribution matches `requirement`. Falls back to pip's vendored
/// `packaging` when the venv lacks it.
fn version_check(module: &str, distribution: &str, requirement: &str) -> String {
    format!(
        "import sys, {module}\n\
         from importlib.metadata import version\n\
         try:\n    from packaging.specifiers import SpecifierSet\n\
         except ImportError:\n    from pip._vendor.packaging.specifiers import SpecifierSet\n\
         sys.exit(0 if SpecifierSet({requirement:?}).contains(version({distribution:?}), prereleases=True) else 1)"
    )
}

pub fn install_script(spec: &DependencySpec, project: &ProjectConfig) -> String {
    match &spec.install {
        InstallMethod::Apt { package } => {
            let package = quote(package);
            format!(
                "if [ \"$(id -u)\" -eq 0 ]; then apt-get install -y {package}; \
                 else sudo -n apt-get install -y {package}; fi"
            )
        }
        InstallMethod::Pip { package } => {
            let requirement = match &spec.version {
                Some(version) => format!("{package}{version}"),
                None => package.clone(),
            };
            format!(
                "{} -m pip install {}",
                quote_path(&project.venv_python()),
                quote(&requirement)
            )
        }
        InstallMethod::OllamaPull { model } => format!("ollama pull {}", quote(model)),
        InstallMethod::Script { command } => command.clone(),
    }
}
