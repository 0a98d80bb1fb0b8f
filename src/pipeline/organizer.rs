//! ダウンロード済みファイルの展開とチーム別フォルダへの配置
//!
//! 出力先: `root/<車>/<チーム>/<年> Season <シーズン>/<トラック>/<ソース>/<ファイル>`

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use zip::ZipArchive;

use crate::config::SyncConfig;
use crate::error::ScraperError;
use crate::mapping::{Mapping, MappingTables};
use crate::progress::UnmappedNames;
use crate::traits::SetupSource;
use crate::types::{ArtifactKind, RawArtifact, ResultDescriptor};

use super::cancel::ensure_active;

const ZIP_MAGIC: [u8; 4] = *b"PK\x03\x04";

/// 整理済みの出力先（成果物×チームごとに1つ）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrganizedPath {
    pub team: String,
    pub path: PathBuf,
    pub files: Vec<PathBuf>,
}

/// 1成果物分の整理結果
#[derive(Debug, Clone, Default)]
pub struct OrganizeOutcome {
    pub car: String,
    pub track: String,
    pub paths: Vec<OrganizedPath>,
    pub unmapped: UnmappedNames,
}

/// アーカイブ内で見つけた `車/トラック` フォルダ
#[derive(Debug, Clone, PartialEq, Eq)]
struct SetupFolder {
    car: String,
    track: String,
    track_dir: PathBuf,
}

/// 実行全体で共有する整理設定（ブロッキングタスクへ渡すため所有型）
#[derive(Debug, Clone)]
pub struct Organizer {
    destination_root: PathBuf,
    staging: PathBuf,
    teams: Vec<String>,
    year: String,
    season: String,
    mappings: MappingTables,
    source_tag: String,
    extension: String,
    map_cars: bool,
    cancel: CancellationToken,
}

impl Organizer {
    pub fn new(config: &SyncConfig, source: &dyn SetupSource) -> Self {
        Self {
            destination_root: config.destination_root.clone(),
            staging: config.download_path.clone(),
            teams: config.teams.clone(),
            year: config.filter.year.clone(),
            season: config.filter.season.clone(),
            mappings: config.mappings.clone(),
            source_tag: source.source_tag().to_string(),
            extension: source.setup_extension().to_string(),
            map_cars: source.maps_car_names(),
            cancel: config.cancel.clone(),
        }
    }

    /// 成果物を展開し、選択中の全チームへコピーしてから元ファイルを削除する
    ///
    /// 拡張子の違う単体ファイルは整理せずに捨てる。
    /// キャンセルは展開中とコピー中にも確認し、一時ディレクトリを消してから戻る。
    /// その場合の元ファイルは呼び出し側が片付ける。
    pub fn organize(
        &self,
        artifact: &RawArtifact,
        item: &ResultDescriptor,
    ) -> Result<OrganizeOutcome, ScraperError> {
        ensure_active(&self.cancel)?;
        let (car_name, track_name, files, extraction) = match artifact.kind {
            ArtifactKind::File => {
                if !has_extension(Path::new(&artifact.file_name), &self.extension) {
                    warn!(
                        "Skipping {}: not a .{} file",
                        artifact.file_name, self.extension
                    );
                    fs::remove_file(&artifact.path)?;
                    return Ok(OrganizeOutcome {
                        car: item.car.clone(),
                        track: item.track.clone(),
                        ..Default::default()
                    });
                }
                let files = vec![(artifact.path.clone(), artifact.file_name.clone())];
                (item.car.clone(), item.track.clone(), files, None)
            }
            ArtifactKind::Directory => {
                let folder = find_setup_folder(&artifact.path, &self.extension)?;
                let files = collect_setup_files(&folder.track_dir, &self.extension);
                (folder.car, folder.track, files, None)
            }
            ArtifactKind::Archive => {
                let temp = tempfile::Builder::new()
                    .prefix("setup-extract-")
                    .tempdir_in(&self.staging)?;
                extract_zip(&artifact.path, temp.path(), &self.cancel)?;
                let folder = find_setup_folder(temp.path(), &self.extension)?;
                let files = collect_setup_files(&folder.track_dir, &self.extension);
                (folder.car, folder.track, files, Some(temp))
            }
        };

        if files.is_empty() {
            return Err(ScraperError::Extraction(format!(
                "no .{} files for {} @ {}",
                self.extension, car_name, track_name
            )));
        }

        let mut unmapped = UnmappedNames::new();
        let car = if self.map_cars {
            let mapping = self.mappings.car(&car_name);
            unmapped.record_car(&car_name, &mapping);
            mapping
        } else {
            Mapping {
                mapped: car_name.clone(),
                was_mapped: true,
            }
        };
        let track = self.mappings.track(&track_name);
        unmapped.record_track(&track_name, &track);
        if !unmapped.is_empty() {
            debug!("Unmapped names: car={} track={}", car_name, track_name);
        }

        let mut paths = Vec::with_capacity(self.teams.len());
        for team in &self.teams {
            ensure_active(&self.cancel)?;
            let dir = organized_dir(
                &self.destination_root,
                &car.mapped,
                team,
                &self.year,
                &self.season,
                &track.mapped,
                &self.source_tag,
            );
            fs::create_dir_all(&dir)?;

            let mut copied = Vec::with_capacity(files.len());
            for (src, name) in &files {
                ensure_active(&self.cancel)?;
                let target = dir.join(name);
                fs::copy(src, &target)?;
                copied.push(target);
            }
            info!("Copied {} file(s) to {:?}", copied.len(), dir);
            paths.push(OrganizedPath {
                team: team.clone(),
                path: dir,
                files: copied,
            });
        }
        if self.teams.is_empty() {
            warn!("No teams selected, {} is consumed without output", artifact.file_name);
        }

        if let Some(temp) = extraction {
            temp.close()?;
        }
        if artifact.kind != ArtifactKind::Directory {
            fs::remove_file(&artifact.path)?;
        }

        Ok(OrganizeOutcome {
            car: car.mapped,
            track: track.mapped,
            paths,
            unmapped,
        })
    }
}

/// 出力先のパスを組み立てる
pub fn organized_dir(
    root: &Path,
    car: &str,
    team: &str,
    year: &str,
    season: &str,
    track: &str,
    source_tag: &str,
) -> PathBuf {
    root.join(path_segment(car))
        .join(path_segment(team))
        .join(path_segment(&format!("{} Season {}", year, season)))
        .join(path_segment(track))
        .join(path_segment(source_tag))
}

/// パス区切りなどファイル名に使えない文字を置換する
fn path_segment(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '-',
            c if c.is_control() => '-',
            c => c,
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}

/// ディレクトリ・zip・単一ファイルを判定する
pub fn detect_kind(path: &Path) -> ArtifactKind {
    if path.is_dir() {
        return ArtifactKind::Directory;
    }
    if has_extension(path, "zip") {
        return ArtifactKind::Archive;
    }
    let mut magic = [0u8; 4];
    let is_zip = match fs::File::open(path) {
        Ok(mut f) => f.read_exact(&mut magic).is_ok() && magic == ZIP_MAGIC,
        Err(_) => false,
    };
    if is_zip {
        ArtifactKind::Archive
    } else {
        ArtifactKind::File
    }
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .is_some_and(|ext| ext.to_string_lossy().eq_ignore_ascii_case(extension))
}

fn extract_zip(
    zip_path: &Path,
    target_dir: &Path,
    cancel: &CancellationToken,
) -> Result<(), ScraperError> {
    let file = fs::File::open(zip_path)?;
    let mut archive = ZipArchive::new(file)?;

    for i in 0..archive.len() {
        ensure_active(cancel)?;
        let mut entry = archive.by_index(i)?;
        let entry_path = match entry.enclosed_name() {
            Some(path) => target_dir.join(path),
            None => {
                return Err(ScraperError::Extraction(format!(
                    "unsafe path in archive: {}",
                    entry.name()
                )))
            }
        };

        if entry.is_dir() {
            fs::create_dir_all(&entry_path)?;
            continue;
        }
        if let Some(parent) = entry_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = fs::File::create(&entry_path)?;
        io::copy(&mut entry, &mut out)?;
    }
    debug!("Extracted {} entries from {:?}", archive.len(), zip_path);
    Ok(())
}

fn is_ignored(name: &str) -> bool {
    name.eq_ignore_ascii_case("__MACOSX") || name.starts_with('.')
}

/// 名前順のサブディレクトリ一覧
fn subdirs(dir: &Path) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = match fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .filter(|p| {
                p.file_name()
                    .is_some_and(|n| !is_ignored(&n.to_string_lossy()))
            })
            .collect(),
        Err(_) => Vec::new(),
    };
    dirs.sort();
    dirs
}

fn holds_setup_files(dir: &Path, extension: &str) -> bool {
    fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .any(|e| e.path().is_file() && has_extension(&e.path(), extension))
        })
        .unwrap_or(false)
}

/// `車/トラック` フォルダを探す
///
/// 最初のサブディレクトリが直接セットアップファイルを持つディレクトリを車フォルダとみなす。
/// 途中の階層数は問わない。見つからなければ「最初のディレクトリ/その最初のサブディレクトリ」。
fn find_setup_folder(root: &Path, extension: &str) -> Result<SetupFolder, ScraperError> {
    let candidates = WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_ignored(&e.file_name().to_string_lossy()))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir());

    for entry in candidates {
        if let Some(track_dir) = subdirs(entry.path()).into_iter().next() {
            if holds_setup_files(&track_dir, extension) {
                return setup_folder(entry.path(), track_dir);
            }
        }
    }

    let car_dir = subdirs(root).into_iter().next().ok_or_else(|| {
        ScraperError::Extraction(format!("setup folder not found in {:?}", root))
    })?;
    let track_dir = subdirs(&car_dir).into_iter().next().ok_or_else(|| {
        ScraperError::Extraction(format!("track folder not found in {:?}", car_dir))
    })?;
    setup_folder(&car_dir, track_dir)
}

fn setup_folder(car_dir: &Path, track_dir: PathBuf) -> Result<SetupFolder, ScraperError> {
    let name = |p: &Path| {
        p.file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| ScraperError::Extraction(format!("unnamed folder {:?}", p)))
    };
    Ok(SetupFolder {
        car: name(car_dir)?,
        track: name(&track_dir)?,
        track_dir,
    })
}

/// トラックフォルダ以下の対象ファイル（再帰）。同名は先勝ち。
fn collect_setup_files(track_dir: &Path, extension: &str) -> Vec<(PathBuf, String)> {
    let mut seen = std::collections::HashSet::new();
    WalkDir::new(track_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && has_extension(e.path(), extension))
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().to_string();
            seen.insert(name.clone())
                .then(|| (e.path().to_path_buf(), name))
        })
        .collect()
}
