use clap::{Args, ValueEnum};
use itertools::Itertools;
use miette::{miette, Context, IntoDiagnostic, Result};
use owo_colors::OwoColorize;
use pvz_rsb::manifest::{GroupInfo, Manifest, ResourceInfo, SubgroupInfo};
use pvz_rsb::BundleArchive;
use similar::{ChangeTag, TextDiff};
use std::{
    cmp::Ordering,
    collections::BTreeMap,
    fmt::Display,
    path::PathBuf,
};

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum Mode {
    #[default]
    Semantic,
    Full,
}

#[derive(Debug, Eq, PartialEq)]
enum Change {
    Added(String, String),
    Removed(String, String),
    Comparison(String, String, String),
    Context(Vec<String>),
    Modified(String, String, Vec<Change>, Vec<Change>),
}

impl Change {
    fn modified(key: &str, value: &str) -> Change {
        Change::Modified(key.into(), value.into(), Vec::new(), Vec::new())
    }

    pub fn with_children(&mut self, children: Vec<Change>) -> Result<()> {
        match self {
            Change::Modified(_, _, vec, _) => {
                vec.extend(children);
                vec.sort();
                Ok(())
            }
            _ => Err(miette!("tried to add children to an addition or removal")),
        }
    }

    pub fn with_related(&mut self, related: Vec<Change>) -> Result<()> {
        match self {
            Change::Modified(_, _, _, vec) => {
                vec.extend(related);
                vec.sort();
                Ok(())
            }
            _ => Err(miette!("tried to add related to an addition or removal")),
        }
    }
}

impl Ord for Change {
    fn cmp(&self, other: &Self) -> Ordering {
        self.partial_cmp(other).unwrap_or(Ordering::Equal)
    }
}

#[allow(clippy::non_canonical_partial_ord_impl)]
impl PartialOrd for Change {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Change::Added(key, value), Change::Added(other_key, other_value))
            | (Change::Removed(key, value), Change::Removed(other_key, other_value)) => {
                Some(key.cmp(other_key).then(value.cmp(other_value)))
            }
            (Change::Comparison(key, _, _), Change::Comparison(other_key, _, _)) => {
                Some(key.cmp(other_key))
            }
            (
                Change::Modified(key, value, children, _),
                Change::Modified(other_key, other_value, other_children, _),
            ) => Some(
                key.cmp(other_key)
                    .then(value.cmp(other_value))
                    .then(children.cmp(other_children)),
            ),
            _ => None,
        }
    }
}

impl Display for Change {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Change::Added(_, v) => {
                writeln!(f, "✅ {}", v.green())
            }
            Change::Removed(_, v) => {
                writeln!(f, "❌ {}", v.red())
            }
            Change::Comparison(key, old, new) => {
                writeln!(f, "* {}: {} vs {}", key, old.red(), new.green())
            }
            Change::Context(values) => {
                writeln!(f, "{}", values.iter().map(|l| format!(" {l}")).join("\n"))
            }
            Change::Modified(_, v, children, related) => {
                let mut txt_final = related.iter().map(|c| format!("{}", c)).join("");

                let mut section = String::new();
                let mut current_key = String::new();
                for c in children {
                    let key = match c {
                        Change::Added(key, _) => format!("* {} added:\n", key),
                        Change::Removed(key, _) => format!("* {} removed:\n", key),
                        Change::Modified(key, _, _, _) => format!("* {} modified:\n", key),
                        _ => current_key.clone(),
                    };

                    if current_key != key {
                        if !section.is_empty() {
                            txt_final.push_str(
                                &section.split('\n').map(|l| "  ".to_string() + l).join("\n"),
                            );
                            txt_final.push('\n');
                        }
                        section.clear();

                        txt_final.push_str(&key);
                        current_key = key
                    }

                    section.push_str(&format!("{}\n", c));
                }

                txt_final.push_str(&section.split('\n').map(|l| "  ".to_string() + l).join("\n"));

                writeln!(f, "🔃 {}", v.blue())?;
                writeln!(
                    f,
                    "{}",
                    txt_final
                        .split('\n')
                        .filter(|l| l.trim().len() > 1)
                        .map(|l| "  ".to_string() + l)
                        .join("\n")
                )
            }
        }
    }
}

/// Compare two values, recording the difference in `result`
fn compare(
    result: &mut Option<Change>,
    key: &str,
    name: &str,
    field: &str,
    left: impl Display,
    right: impl Display,
) -> Result<()> {
    let (left, right) = (left.to_string(), right.to_string());
    if left != right {
        result
            .get_or_insert_with(|| Change::modified(key, name))
            .with_related(vec![Change::Comparison(field.into(), left, right)])?;
    }
    Ok(())
}

/// Keys only on the right as additions, keys only on the left as removals
fn added_and_removed<V>(
    key: &str,
    left: &BTreeMap<String, V>,
    right: &BTreeMap<String, V>,
) -> Vec<Change> {
    let added = right
        .keys()
        .filter(|k| !left.contains_key(*k))
        .map(|k| Change::Added(key.into(), k.clone()));
    let removed = left
        .keys()
        .filter(|k| !right.contains_key(*k))
        .map(|k| Change::Removed(key.into(), k.clone()));
    added.chain(removed).collect()
}

fn groups_by_name(manifest: &Manifest) -> BTreeMap<String, &GroupInfo> {
    manifest
        .groups
        .iter()
        .map(|group| (group.name.to_ascii_uppercase(), group))
        .collect()
}

fn packets_by_name(group: &GroupInfo) -> BTreeMap<String, &SubgroupInfo> {
    group
        .subgroups
        .iter()
        .map(|subgroup| (subgroup.packet_name.to_ascii_uppercase(), subgroup))
        .collect()
}

fn atlas_summary(resource: &ResourceInfo) -> String {
    match (resource.atlas, resource.atlas_properties) {
        (Some(atlas), Some(properties)) => format!(
            "#{} {}x{} format {} pitch {}",
            atlas.id, atlas.width, atlas.height, properties.format, properties.pitch
        ),
        (Some(atlas), None) => format!("#{} {}x{}", atlas.id, atlas.width, atlas.height),
        (None, _) => "none".into(),
    }
}

#[derive(Args)]
pub struct DiffArgs {
    /// An input RSB file
    #[arg(short, long, value_name = "FILE")]
    left: PathBuf,

    /// An input RSB file
    #[arg(short, long, value_name = "FILE")]
    right: PathBuf,

    /// Comparison mode
    #[arg(short, long, value_enum, default_value_t = Mode::Semantic)]
    mode: Mode,
}

impl DiffArgs {
    fn inline_diff(&self, left: &str, right: &str) -> Vec<String> {
        let diff = TextDiff::from_lines(left, right);

        let mut comparison = Vec::new();
        for op in diff.ops().iter() {
            for change in diff.iter_inline_changes(op) {
                let mut context = String::new();
                for (emphasized, value) in change.iter_strings_lossy() {
                    if emphasized {
                        if change.tag() == ChangeTag::Insert {
                            context.push_str(&format!("{}", value.green().underline()));
                        } else {
                            context.push_str(&format!("{}", value.red().underline()));
                        }
                    } else {
                        context.push_str(&format!("{}", value.dimmed()));
                    }
                }
                comparison.push(context.trim_end().to_string());
            }
        }
        comparison
    }

    fn handle_packet(&self, left: &SubgroupInfo, right: &SubgroupInfo) -> Result<Option<Change>> {
        let name = left.packet_name.as_str();
        let mut result: Option<Change> = None;

        compare(&mut result, "packets", name, "resolution", &left.category[0], &right.category[0])?;
        compare(&mut result, "packets", name, "locale", &left.category[1], &right.category[1])?;
        compare(&mut result, "packets", name, "version", left.packet.version, right.packet.version)?;
        compare(
            &mut result,
            "packets",
            name,
            "compression flags",
            left.packet.compression_flags,
            right.packet.compression_flags,
        )?;

        let by_path = |subgroup: &SubgroupInfo| {
            subgroup
                .packet
                .resources
                .iter()
                .map(|resource| (resource.path.to_ascii_uppercase(), resource.clone()))
                .collect::<BTreeMap<_, _>>()
        };
        let (left_resources, right_resources) = (by_path(left), by_path(right));

        let mut children = added_and_removed("resources", &left_resources, &right_resources);
        for (path, left_resource) in &left_resources {
            let Some(right_resource) = right_resources.get(path) else {
                continue;
            };
            let mut resource = None;
            compare(
                &mut resource,
                "resources",
                path,
                "atlas",
                atlas_summary(left_resource),
                atlas_summary(right_resource),
            )?;
            children.extend(resource);
        }
        if !children.is_empty() {
            result
                .get_or_insert_with(|| Change::modified("packets", name))
                .with_children(children)?;
        }

        if self.mode == Mode::Full {
            if let Some(change) = result.as_mut() {
                let left = serde_json::to_string_pretty(&left.packet).into_diagnostic()?;
                let right = serde_json::to_string_pretty(&right.packet).into_diagnostic()?;
                change.with_related(vec![Change::Context(self.inline_diff(&left, &right))])?;
            }
        }

        Ok(result)
    }

    fn handle_group(&self, left: &GroupInfo, right: &GroupInfo) -> Result<Option<Change>> {
        let name = left.name.as_str();
        let mut result: Option<Change> = None;

        compare(&mut result, "groups", name, "composite", left.is_composite, right.is_composite)?;

        let (left_packets, right_packets) = (packets_by_name(left), packets_by_name(right));

        let mut children = added_and_removed("packets", &left_packets, &right_packets);
        for (key, left_packet) in &left_packets {
            if let Some(right_packet) = right_packets.get(key) {
                children.extend(self.handle_packet(left_packet, right_packet)?);
            }
        }
        if !children.is_empty() {
            result
                .get_or_insert_with(|| Change::modified("groups", name))
                .with_children(children)?;
        }

        Ok(result)
    }

    fn handle_bundle(&self, name: &str, left: &Manifest, right: &Manifest) -> Result<Option<Change>> {
        let mut result: Option<Change> = None;

        compare(&mut result, "rsb", name, "version", left.version, right.version)?;
        compare(
            &mut result,
            "rsb",
            name,
            "atlas record stride",
            left.atlas_record_stride,
            right.atlas_record_stride,
        )?;
        if self.mode == Mode::Full {
            compare(
                &mut result,
                "rsb",
                name,
                "description",
                left.description.is_some(),
                right.description.is_some(),
            )?;
        }

        let (left_groups, right_groups) = (groups_by_name(left), groups_by_name(right));

        let mut children = added_and_removed("groups", &left_groups, &right_groups);
        for (key, left_group) in &left_groups {
            if let Some(right_group) = right_groups.get(key) {
                children.extend(self.handle_group(left_group, right_group)?);
            }
        }
        if !children.is_empty() {
            result
                .get_or_insert_with(|| Change::modified("rsb", name))
                .with_children(children)?;
        }

        Ok(result)
    }

    pub fn handle(&self) -> Result<()> {
        let left_data = std::fs::read(&self.left)
            .into_diagnostic()
            .context(format!("path: {}", &self.left.display()))?;
        let left = BundleArchive::new(&left_data)?;

        let right_data = std::fs::read(&self.right)
            .into_diagnostic()
            .context(format!("path: {}", &self.right.display()))?;
        let right = BundleArchive::new(&right_data)?;

        let difference = self.handle_bundle(
            &self.left.to_string_lossy(),
            left.manifest(),
            right.manifest(),
        )?;

        if let Some(d) = difference {
            println!("{}", d);
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use pvz_rsb::manifest::{AtlasInfo, GroupInfo, Manifest, PacketInfo, ResourceInfo, SubgroupInfo};
    use pvz_rsb::CompressionFlags;

    use super::{Change, DiffArgs, Mode};

    fn manifest(width: u32) -> Manifest {
        Manifest {
            version: 4,
            atlas_record_stride: 0x10,
            groups: vec![GroupInfo {
                name: "WORLDMAP".into(),
                is_composite: true,
                subgroups: vec![SubgroupInfo {
                    packet_name: "WORLDMAP_1536".into(),
                    category: ["1536".into(), String::new()],
                    packet: PacketInfo {
                        version: 4,
                        compression_flags: CompressionFlags::Both,
                        resources: vec![ResourceInfo::atlas(
                            "IMAGES\\MAP.PTX",
                            AtlasInfo {
                                id: 0,
                                width,
                                height: 32,
                            },
                        )],
                    },
                }],
            }],
            description: None,
        }
    }

    fn args(mode: Mode) -> DiffArgs {
        DiffArgs {
            left: "left.rsb".into(),
            right: "right.rsb".into(),
            mode,
        }
    }

    #[test]
    fn identical_bundles_have_no_changes() -> miette::Result<()> {
        let diff = args(Mode::Semantic).handle_bundle("main", &manifest(64), &manifest(64))?;
        assert_eq!(diff, None);
        Ok(())
    }

    #[test]
    fn atlas_dimensions_are_compared() -> miette::Result<()> {
        let diff = args(Mode::Semantic).handle_bundle("main", &manifest(64), &manifest(128))?;

        let atlas = Change::Modified(
            "resources".into(),
            "IMAGES\\MAP.PTX".into(),
            vec![],
            vec![Change::Comparison(
                "atlas".into(),
                "#0 64x32".into(),
                "#0 128x32".into(),
            )],
        );
        let packet = Change::Modified("packets".into(), "WORLDMAP_1536".into(), vec![atlas], vec![]);
        let group = Change::Modified("groups".into(), "WORLDMAP".into(), vec![packet], vec![]);
        assert_eq!(
            diff,
            Some(Change::Modified("rsb".into(), "main".into(), vec![group], vec![]))
        );
        Ok(())
    }

    #[test]
    fn full_mode_adds_an_inline_diff() -> miette::Result<()> {
        let mut right = manifest(64);
        right.groups[0].subgroups[0].packet.compression_flags = CompressionFlags::None;

        let diff = args(Mode::Full).handle_bundle("main", &manifest(64), &right)?;
        let Some(Change::Modified(_, _, groups, _)) = diff else {
            panic!("expected a modified bundle");
        };
        let Change::Modified(_, _, packets, _) = &groups[0] else {
            panic!("expected a modified group");
        };
        let Change::Modified(_, _, _, related) = &packets[0] else {
            panic!("expected a modified packet");
        };
        assert!(related.iter().any(|c| matches!(c, Change::Context(lines) if !lines.is_empty())));
        Ok(())
    }
}
