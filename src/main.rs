use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::info;
use rollcall::challenge;
use rollcall::config::{self, Config, FeatureKind, DATA_DIR};
use rollcall::{
    gallery, mark_attendance, AttendanceLedger, Challenge, DeviceSpec, FaceSettings, FaceVerifier,
    FileLedger, FileStore, GalleryStore, GeoCheckInput, GeoVerifier, Geofence, IpApi, MarkRequest,
    Microphone, Pipeline, Purpose, ReputationSource, SpeechApi, Transcriber, VoiceEncoder,
    VoiceMode, VoiceSettings, VoiceVerifier, WavInput,
};
use rollcall_audio::{MfccConfig, MfccEncoder, OnnxVoiceEncoder};
use serde::Serialize;

#[derive(Parser)]
#[command(name = "rollcall")]
#[command(version, about = "Classroom attendance with face, voice and location checks")]
struct Cli {
    /// Config file (defaults to the compiled-in path)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ChallengeKind {
    Enrollment,
    Verification,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a face; blink once per capture
    EnrollFace {
        #[arg(short, long)]
        user: String,
        /// Capture one face without the blink gate
        #[arg(long)]
        single: bool,
        /// Camera device or directory of frames
        #[arg(long)]
        camera: Option<String>,
    },
    /// Identify the face in front of the camera
    VerifyFace {
        #[arg(long)]
        camera: Option<String>,
    },
    /// Preview a phrase of the given kind; nothing is issued or stored
    Phrase {
        #[arg(long, value_enum, default_value = "verification")]
        kind: ChallengeKind,
    },
    /// Record and store a voiceprint
    EnrollVoice {
        #[arg(short, long)]
        user: String,
        /// Use a WAV file instead of the microphone
        #[arg(long)]
        wav: Option<PathBuf>,
    },
    /// Speak a fresh challenge phrase and compare voiceprints
    VerifyVoice {
        #[arg(short, long)]
        user: String,
        #[arg(long)]
        wav: Option<PathBuf>,
        /// Skip transcription and decide on similarity alone
        #[arg(long)]
        similarity_only: bool,
    },
    /// Check a position against a geofence
    Geo {
        #[arg(long, allow_hyphen_values = true)]
        teacher_lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        teacher_lng: f64,
        #[arg(long)]
        radius: f64,
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lng: f64,
        #[arg(long)]
        ip: Option<String>,
    },
    /// Classify an IP address (this host's public address by default)
    Proxy {
        #[arg(long)]
        ip: Option<String>,
    },
    /// Record attendance for a student in a session
    Mark {
        #[arg(long)]
        session: String,
        #[arg(long)]
        student: String,
        #[arg(long)]
        speech_ok: bool,
        #[arg(long)]
        face_ok: bool,
        #[arg(long, allow_hyphen_values = true)]
        lat: Option<f64>,
        #[arg(long, allow_hyphen_values = true)]
        lng: Option<f64>,
        #[arg(long, allow_hyphen_values = true)]
        fence_lat: Option<f64>,
        #[arg(long, allow_hyphen_values = true)]
        fence_lng: Option<f64>,
        #[arg(long)]
        radius: Option<f64>,
        #[arg(long)]
        ip: Option<String>,
    },
    /// List attendance records
    Attendance {
        #[arg(long)]
        session: Option<String>,
        #[arg(long)]
        student: Option<String>,
    },
    /// Remove all face and voice data for a user
    Purge {
        #[arg(short, long)]
        user: String,
    },
    /// Open config file in editor
    Config,
}

fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .format_target(false)
        .format_timestamp(None)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::EnrollFace {
            user,
            single,
            camera,
        } => {
            let verifier = face_verifier(&cfg)?;
            let device = DeviceSpec(camera.unwrap_or_else(|| cfg.camera.clone()));
            let result = if single {
                verifier.enroll_single(&user, &device)
            } else {
                verifier.enroll(&user, &device)
            };
            print_json(&result)
        }
        Commands::VerifyFace { camera } => {
            let verifier = face_verifier(&cfg)?;
            let device = DeviceSpec(camera.unwrap_or_else(|| cfg.camera.clone()));
            print_json(&verifier.verify(&device))
        }
        Commands::Phrase { kind } => {
            let mut rng = rand::thread_rng();
            let (purpose, phrase) = match kind {
                ChallengeKind::Enrollment => (
                    Purpose::Enrollment,
                    challenge::enrollment_phrase(&mut rng, cfg.voice.enroll_words),
                ),
                ChallengeKind::Verification => (
                    Purpose::Verification,
                    challenge::verification_phrase(&mut rng).to_string(),
                ),
            };
            print_json(&serde_json::json!({ "purpose": purpose, "phrase": phrase }))
        }
        Commands::EnrollVoice { user, wav } => {
            let verifier = voice_verifier(&cfg, cfg.voice.mode)?;
            let challenge = issue(&cfg, &user, Purpose::Enrollment)?;
            let mut mic = microphone(wav)?;
            print_json(&verifier.enroll(&user, challenge, mic.as_mut()))
        }
        Commands::VerifyVoice {
            user,
            wav,
            similarity_only,
        } => {
            let mode = if similarity_only {
                VoiceMode::SimilarityOnly
            } else {
                cfg.voice.mode
            };
            let verifier = voice_verifier(&cfg, mode)?;
            let challenge = issue(&cfg, &user, Purpose::Verification)?;
            let mut mic = microphone(wav)?;
            print_json(&verifier.verify(&user, challenge, mic.as_mut()))
        }
        Commands::Geo {
            teacher_lat,
            teacher_lng,
            radius,
            lat,
            lng,
            ip,
        } => {
            let input = GeoCheckInput {
                teacher_lat,
                teacher_lng,
                radius_m: radius,
                student_lat: lat,
                student_lng: lng,
            };
            print_json(&geo_verifier(&cfg).verify(&input, ip.as_deref()))
        }
        Commands::Proxy { ip } => {
            let api = IpApi::new(&cfg.geo);
            let ip = match ip {
                Some(ip) => ip,
                None => api.public_ip().context("Failed to discover public IP")?,
            };
            let verdict = api.classify(&ip);
            print_json(&serde_json::json!({
                "ip": ip,
                "is_proxy": verdict.is_proxy,
                "error": verdict.error,
            }))
        }
        Commands::Mark {
            session,
            student,
            speech_ok,
            face_ok,
            lat,
            lng,
            fence_lat,
            fence_lng,
            radius,
            ip,
        } => {
            let fence = Geofence::from_session(fence_lat, fence_lng, radius)?;
            let request = MarkRequest {
                session_id: session,
                student_id: student,
                speech_ok,
                face_ok,
                lat,
                lng,
                client_ip: ip,
            };
            let ledger = ledger();
            match mark_attendance(&ledger, &geo_verifier(&cfg), fence.as_ref(), &request) {
                Ok(fact) => print_json(&fact),
                Err(err) => print_json(&serde_json::json!({
                    "ok": false,
                    "error": err.to_string(),
                    "failure": err.kind(),
                })),
            }
        }
        Commands::Attendance { session, student } => {
            let ledger = ledger();
            let mut facts = match (&session, &student) {
                (Some(session), _) => ledger.by_session(session)?,
                (None, Some(student)) => ledger.by_student(student)?,
                (None, None) => ledger.all()?,
            };
            if let (Some(_), Some(student)) = (&session, &student) {
                facts.retain(|f| &f.student_id == student);
            }
            print_json(&facts)
        }
        Commands::Purge { user } => {
            info!("Purging face and voice data for user: {}", user);
            let store = FileStore::new(DATA_DIR.as_path());
            let purged = gallery::purge_identity(&store, &user).context("Failed to purge")?;
            print_json(&serde_json::json!({ "user": user, "purged": purged }))
        }
        Commands::Config => open_config(cli.config),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn store() -> Arc<dyn GalleryStore> {
    Arc::new(FileStore::new(DATA_DIR.as_path()))
}

fn ledger() -> FileLedger {
    FileLedger::new(DATA_DIR.join("attendance.bin"))
}

fn face_verifier(cfg: &Config) -> Result<FaceVerifier> {
    let pipeline = Pipeline::new(&cfg.face.model_paths(), cfg.face.model_version.clone())
        .context("Failed to initialize face recognition pipeline")?
        .with_thresholds(cfg.face.score_threshold, cfg.face.nms_threshold);
    Ok(FaceVerifier::new(
        Box::new(pipeline),
        store(),
        FaceSettings::from(cfg),
    )?)
}

fn voice_encoder(cfg: &Config) -> Result<Box<dyn VoiceEncoder + Send>> {
    Ok(match cfg.voice.features {
        FeatureKind::Mfcc => Box::new(MfccEncoder::new(MfccConfig {
            sample_rate: cfg.voice.sample_rate,
            ..MfccConfig::default()
        })),
        FeatureKind::Onnx => {
            let path = &cfg.voice.embedding_model;
            let version = path
                .file_stem()
                .map(|s| format!("onnx-{}", s.to_string_lossy()))
                .unwrap_or_else(|| "onnx".to_string());
            Box::new(
                OnnxVoiceEncoder::new(path, version)
                    .context("Failed to load voice embedding model")?,
            )
        }
    })
}

fn voice_verifier(cfg: &Config, mode: VoiceMode) -> Result<VoiceVerifier> {
    let transcriber: Option<Box<dyn Transcriber>> = match mode {
        VoiceMode::Strict => Some(Box::new(SpeechApi::new(&cfg.speech))),
        VoiceMode::SimilarityOnly => None,
    };
    let settings = VoiceSettings {
        mode,
        ..VoiceSettings::from(cfg)
    };
    Ok(VoiceVerifier::new(
        voice_encoder(cfg)?,
        transcriber,
        store(),
        settings,
    )?)
}

fn geo_verifier(cfg: &Config) -> GeoVerifier {
    let reputation: Option<Box<dyn ReputationSource>> = if cfg.geo.reject_proxies {
        Some(Box::new(IpApi::new(&cfg.geo)))
    } else {
        None
    };
    GeoVerifier::new(reputation, cfg.geo.reject_proxies)
}

/// Issue a phrase, show it to the speaker, and hand back the one-shot challenge.
fn issue(cfg: &Config, user: &str, purpose: Purpose) -> Result<Challenge> {
    let book = rollcall::ChallengeBook::new(cfg.voice.challenge_ttl(), cfg.voice.enroll_words);
    let (id, phrase) = book.issue(user, purpose)?;
    eprintln!("Please say: \"{phrase}\"");
    Ok(book.redeem(id, user, purpose)?)
}

fn microphone(wav: Option<PathBuf>) -> Result<Box<dyn Microphone>> {
    if let Some(path) = wav {
        return Ok(Box::new(WavInput::new(path)));
    }
    live_microphone()
}

#[cfg(feature = "cpal")]
fn live_microphone() -> Result<Box<dyn Microphone>> {
    Ok(Box::new(rollcall_audio::LiveMicrophone::default()))
}

#[cfg(not(feature = "cpal"))]
fn live_microphone() -> Result<Box<dyn Microphone>> {
    anyhow::bail!("built without the `cpal` feature; pass --wav to use a recording")
}

fn open_config(path: Option<PathBuf>) -> Result<()> {
    let config_path = path.unwrap_or_else(|| config::CONFIG_PATH.to_path_buf());
    let editor = env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());

    info!("Opening config file: {:?}", config_path);

    if !config_path.exists() {
        config::save_config(&Config::default(), Some(&config_path))
            .context("Failed to write default config")?;
    }

    let status = std::process::Command::new(editor)
        .arg(&config_path)
        .status()
        .context("Failed to open editor")?;

    if !status.success() {
        anyhow::bail!("Editor exited with non-zero status");
    }

    Ok(())
}
