//! Purpose: Hold top-level CLI command dispatch for `plugspace`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap and delegate command execution.
//! Invariants: Output envelopes and exit code semantics match `main.rs` helpers.
//! Invariants: Every loaded namespace is closed before a command returns.

use super::*;

pub(super) fn dispatch_command(command: Command, settings: &Settings) -> Result<RunOutcome, Error> {
    match command {
        Command::Completion { shell } => {
            let mut cmd = Cli::command();
            clap_complete::aot::generate(shell, &mut cmd, "plugspace", &mut io::stdout());
            Ok(RunOutcome::ok())
        }
        Command::Version => {
            emit_version_output();
            Ok(RunOutcome::ok())
        }
        Command::List => {
            let loader = build_loader(settings)?;
            let report = loader.load_all()?;
            emit_load_notices("list", &report, settings.color_mode);

            let plugins: Vec<Value> = report
                .discovered
                .iter()
                .map(|plugin| {
                    let ns = loader.namespace(&plugin.descriptor.name);
                    json!({
                        "name": plugin.descriptor.name,
                        "version": plugin.descriptor.version,
                        "path": plugin.path.display().to_string(),
                        "depends": plugin.descriptor.depends,
                        "soft_depends": plugin.descriptor.soft_depends,
                        "loaded": ns.is_some(),
                        "symbols": ns.map(|ns| ns.symbols().len()),
                    })
                })
                .collect();
            let skipped: Vec<Value> = report
                .skipped
                .iter()
                .map(|skipped| {
                    json!({
                        "name": skipped.name,
                        "reason": skipped.reason,
                        "missing": skipped.missing,
                    })
                })
                .collect();
            loader.unload_all()?;
            emit_json(json!({
                "plugin_dir": settings.plugin_dir.display().to_string(),
                "plugins": plugins,
                "skipped": skipped,
                "cycles": report.cyclic,
            }));
            Ok(RunOutcome::ok())
        }
        Command::Inspect { plugin } => {
            let path = resolve_plugin_ref(&plugin, &settings.plugin_dir)?;
            let summary =
                ArchiveSummary::read(&path).map_err(|err| add_missing_plugin_hint(err, &plugin))?;
            let value = serde_json::to_value(&summary).map_err(|err| {
                Error::new(ErrorKind::Internal)
                    .with_message("failed to encode archive summary")
                    .with_source(err)
            })?;
            emit_json(json!({ "archive": value }));
            Ok(RunOutcome::ok())
        }
        Command::Resolve { plugin, symbol } => {
            let loader = build_loader(settings)?;
            let report = loader.load_all()?;
            emit_load_notices("resolve", &report, settings.color_mode);

            let resolved = loader
                .resolve(&plugin, &symbol)
                .map_err(|err| add_missing_plugin_hint(err, &plugin));
            let value = resolved.map(|found| {
                let defined_by = found
                    .defining_namespace()
                    .and_then(|id| loader.name_of(id));
                SymbolSummary::new(&found, &plugin, defined_by)
            });
            loader.unload_all()?;
            let summary = value?;
            let value = serde_json::to_value(&summary).map_err(|err| {
                Error::new(ErrorKind::Internal)
                    .with_message("failed to encode symbol summary")
                    .with_source(err)
            })?;
            emit_json(json!({ "resolved": value }));
            Ok(RunOutcome::ok())
        }
        Command::Pack {
            src,
            out,
            name,
            plugin_version,
            depends,
            soft_depends,
        } => {
            if !src.is_dir() {
                return Err(Error::new(ErrorKind::NotFound)
                    .with_message("source directory not found")
                    .with_path(&src));
            }
            if out.starts_with(&src) {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message("output archive must not be inside the source directory")
                    .with_path(&out)
                    .with_hint("Write the archive next to the source directory instead."));
            }
            let has_descriptor = src.join(DESCRIPTOR_ENTRY).is_file();
            let generated = match name {
                Some(_) if has_descriptor => {
                    return Err(Error::new(ErrorKind::Usage)
                        .with_message("--name conflicts with plugin.json in the source directory")
                        .with_path(src.join(DESCRIPTOR_ENTRY))
                        .with_hint("Remove --name or edit plugin.json."));
                }
                Some(name) => {
                    let descriptor = Descriptor::new(name, plugin_version)
                        .with_depends(depends)
                        .with_soft_depends(soft_depends);
                    descriptor.validate()?;
                    let bytes = serde_json::to_vec_pretty(&descriptor).map_err(|err| {
                        Error::new(ErrorKind::Internal)
                            .with_message("failed to encode descriptor")
                            .with_source(err)
                    })?;
                    Some(bytes)
                }
                None => None,
            };

            let mut writer = ArchiveWriter::create(&out)?;
            writer.append_dir(&src)?;
            if let Some(bytes) = &generated {
                writer.append(DESCRIPTOR_ENTRY, bytes)?;
            }
            let entries = writer.finish()?;
            let summary = ArchiveSummary::read(&out)?;
            emit_json(json!({
                "packed": {
                    "path": out.display().to_string(),
                    "name": summary.descriptor.name,
                    "entries": entries,
                    "symbols": summary.symbols.len(),
                    "sha256": summary.sha256,
                }
            }));
            Ok(RunOutcome::ok())
        }
    }
}
