use log::{debug, info, warn};
use std::fs;
use std::path::Path;

use crate::backup;
use crate::digest;
use crate::error::{Error, IoContext, Result};
use crate::resource_id::ResourceIdResolver;
use crate::snapshot::OriginalSnapshot;
use crate::util::DataFile;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ApplySummary {
    pub files_copied: usize,
    pub files_replaced: usize,
    pub skipped_identical: usize,
    pub missing_sources: usize,
    pub remapped: usize,
}

impl ApplySummary {
    pub fn absorb(&mut self, other: &ApplySummary) {
        self.files_copied += other.files_copied;
        self.files_replaced += other.files_replaced;
        self.skipped_identical += other.skipped_identical;
        self.missing_sources += other.missing_sources;
        self.remapped += other.remapped;
    }
}

/// Apply one extracted patch onto the install, sequentially, in index order.
///
/// Per file: resolve the destination (remapping colliding resource IDs), skip
/// if the content is already there, otherwise back up any existing target and
/// copy. A rerun after an interruption therefore resumes at the first file
/// whose content still differs.
pub fn apply_patch(
    game_dir: &Path,
    origin: &Path,
    files: &[DataFile],
    snapshot: &OriginalSnapshot,
    resolver: &mut ResourceIdResolver,
) -> Result<ApplySummary> {
    let mut summary = ApplySummary::default();
    resolver.stage_patch(files.iter().map(|f| &f.path));

    let total = files.len();
    for (index, file) in files.iter().enumerate() {
        if !file.full_path.is_file() {
            warn!(
                "Apply: skipping - {}",
                Error::MissingSourceFile(file.full_path.clone())
            );
            summary.missing_sources += 1;
            continue;
        }

        let resolved = resolver.resolve(&file.path)?;
        if resolved != file.path {
            info!("Apply: {} -> {}", file.path, resolved);
            summary.remapped += 1;
        }
        let destination = snapshot.canonical(&resolved).unwrap_or(&resolved);
        let target = destination.to_path(game_dir);

        if !digest::differs(&file.full_path, &target)? {
            debug!("Apply: {} already up to date", destination);
            summary.skipped_identical += 1;
            continue;
        }

        let replacing = target.exists();
        if replacing {
            backup::snapshot(&target, origin)?;
            summary.files_replaced += 1;
        } else if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).at(parent)?;
        }
        fs::copy(&file.full_path, &target).at(&target)?;
        summary.files_copied += 1;

        let percent = (index + 1) as f64 / total as f64 * 100.0;
        info!(
            "[{percent:6.2}%] Moving file {index}: {}{}",
            file.path.file_name(),
            if replacing { " [REPLACING...]" } else { "" }
        );
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::list_data_files;
    use crate::resource_id::IdGrammar;
    use tempfile::tempdir;

    struct Fixture {
        game: tempfile::TempDir,
        patch: tempfile::TempDir,
        snapshot: OriginalSnapshot,
    }

    fn fixture(patch_files: &[(&str, &[u8])]) -> Fixture {
        let game = tempdir().unwrap();
        let car = game.path().join("data/cars/car_5");
        fs::create_dir_all(&car).unwrap();
        fs::write(car.join("body.dds"), b"stock body").unwrap();
        let snapshot = OriginalSnapshot::capture(game.path(), "data", &[]).unwrap();

        let patch = tempdir().unwrap();
        for (rel, content) in patch_files {
            let full = patch.path().join(rel);
            fs::create_dir_all(full.parent().unwrap()).unwrap();
            fs::write(full, content).unwrap();
        }
        Fixture {
            game,
            patch,
            snapshot,
        }
    }

    fn run(fx: &Fixture, resolver: &mut ResourceIdResolver) -> ApplySummary {
        let files = list_data_files(fx.patch.path(), "data", &[]).unwrap();
        apply_patch(fx.game.path(), fx.patch.path(), &files, &fx.snapshot, resolver).unwrap()
    }

    fn resolver(fx: &Fixture) -> ResourceIdResolver {
        ResourceIdResolver::new(IdGrammar::new("car_"), fx.snapshot.paths())
    }

    #[test]
    fn overwrite_backs_up_then_copies() {
        let fx = fixture(&[("data/cars/car_5/body.dds", b"tuned body")]);
        let summary = run(&fx, &mut resolver(&fx));

        let car = fx.game.path().join("data/cars/car_5");
        assert_eq!(summary.files_copied, 1);
        assert_eq!(summary.files_replaced, 1);
        assert_eq!(fs::read(car.join("body.dds")).unwrap(), b"tuned body");
        assert_eq!(fs::read(car.join("body.dds.backup0")).unwrap(), b"stock body");
    }

    #[test]
    fn second_application_is_a_no_op() {
        let fx = fixture(&[
            ("data/cars/car_5/body.dds", b"tuned body"),
            ("data/menu/new.bed", b"menu"),
        ]);
        run(&fx, &mut resolver(&fx));
        let again = run(&fx, &mut resolver(&fx));

        assert_eq!(again.files_copied, 0);
        assert_eq!(again.skipped_identical, 2);
        let car = fx.game.path().join("data/cars/car_5");
        assert!(!car.join("body.dds.backup1").exists());
    }

    #[test]
    fn new_asset_on_taken_id_is_remapped() {
        let fx = fixture(&[("mod/data/cars/car_5/wheel.dds", b"wheel")]);
        let mut r = resolver(&fx);
        let summary = run(&fx, &mut r);

        assert_eq!(summary.remapped, 1);
        let cars = fx.game.path().join("data/cars");
        assert_eq!(fs::read(cars.join("car_6/wheel.dds")).unwrap(), b"wheel");
        assert!(!cars.join("car_5/wheel.dds").exists());
        assert!(r.known_ids().contains(&6));
    }

    #[test]
    fn vanished_source_is_skipped() {
        let fx = fixture(&[("data/a.bed", b"a"), ("data/b.bed", b"b")]);
        let files = list_data_files(fx.patch.path(), "data", &[]).unwrap();
        fs::remove_file(fx.patch.path().join("data/a.bed")).unwrap();

        let summary = apply_patch(
            fx.game.path(),
            fx.patch.path(),
            &files,
            &fx.snapshot,
            &mut resolver(&fx),
        )
        .unwrap();
        assert_eq!(summary.missing_sources, 1);
        assert_eq!(summary.files_copied, 1);
    }
}
