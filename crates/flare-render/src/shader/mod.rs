//! Shader manifest and source loading.
//!
//! Sources are WGSL, one file per stage or in-memory strings. `#include <path>`
//! lines are replaced by the named file, resolved against the top-level shader's
//! directory (the shader directory for in-memory sources), until no directive
//! remains. Every stage is prefixed with the generated frame prelude.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{RendererError, Result};
use crate::frame::wgsl_prelude;
use crate::resource::{ShaderProgramDesc, ShaderStages};

/// Expansion passes before an include chain is considered cyclic.
pub const MAX_INCLUDE_PASSES: usize = 64;

const INCLUDE_DIRECTIVE: &str = "#include";

// ── manifest ──────────────────────────────────────────────────────────────

/// One named program in the built-in shader set.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ShaderManifestEntry {
    pub name: &'static str,
    /// Stage stems: `<stem>.vert.wgsl`, `<stem>.frag.wgsl`.
    pub vertex: &'static str,
    pub fragment: &'static str,
    pub uniform_slots: &'static [u32],
    pub texture_slots: u32,
}

impl ShaderManifestEntry {
    pub fn desc(&self, dir: &Path) -> ShaderProgramDesc {
        ShaderProgramDesc::from_files(
            self.name,
            dir.join(format!("{}.vert.wgsl", self.vertex)),
            dir.join(format!("{}.frag.wgsl", self.fragment)),
            self.uniform_slots.to_vec(),
            self.texture_slots,
        )
    }
}

/// Programs compiled during renderer init.
pub const SHADER_MANIFEST: &[ShaderManifestEntry] = &[
    ShaderManifestEntry {
        name: "QuadBatchShader",
        vertex: "QuadBatch",
        fragment: "QuadBatch",
        uniform_slots: &[0],
        texture_slots: crate::batch::MAX_QUAD_TEXTURES_PER_BATCH as u32,
    },
    ShaderManifestEntry {
        name: "ImageShader",
        vertex: "Image",
        fragment: "Image",
        uniform_slots: &[0],
        texture_slots: 1,
    },
    ShaderManifestEntry {
        name: "BlurShader",
        vertex: "Image",
        fragment: "Blur",
        uniform_slots: &[0, crate::blur::BLUR_UNIFORM_SLOT],
        texture_slots: 1,
    },
    ShaderManifestEntry {
        name: "LineShader",
        vertex: "FlatColor",
        fragment: "FlatColor",
        uniform_slots: &[0],
        texture_slots: 0,
    },
    ShaderManifestEntry {
        name: "GizmoShader",
        vertex: "FlatColor",
        fragment: "FlatColor",
        uniform_slots: &[0],
        texture_slots: 0,
    },
    ShaderManifestEntry {
        name: "CircleOutlineShader",
        vertex: "FlatColor",
        fragment: "FlatColor",
        uniform_slots: &[0],
        texture_slots: 0,
    },
    ShaderManifestEntry {
        name: "GridShader",
        vertex: "Grid",
        fragment: "Grid",
        uniform_slots: &[0, crate::material::MATERIAL_UNIFORM_SLOT],
        texture_slots: 0,
    },
    ShaderManifestEntry {
        name: "LitSpriteShader",
        vertex: "LitSprite",
        fragment: "LitSprite",
        uniform_slots: &[0, crate::material::MATERIAL_UNIFORM_SLOT],
        texture_slots: 1,
    },
];

pub fn manifest_entry(name: &str) -> Option<&'static ShaderManifestEntry> {
    SHADER_MANIFEST.iter().find(|e| e.name == name)
}

/// Stage file stem: `QuadBatch` for `.../QuadBatch.vert.wgsl`.
pub fn stage_stem(path: &Path) -> Option<&str> {
    let file = path.file_name()?.to_str()?;
    file.split('.').next().filter(|s| !s.is_empty())
}

// ── sources ───────────────────────────────────────────────────────────────

/// Preprocessed stage sources plus the declared binding interface.
///
/// The paths are `None` for programs built from in-memory sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderSources {
    pub name: String,
    pub vertex_path: Option<PathBuf>,
    pub fragment_path: Option<PathBuf>,
    pub vertex: String,
    pub fragment: String,
    pub uniform_slots: Vec<u32>,
    pub texture_slots: u32,
}

impl ShaderSources {
    /// Reads, preprocesses and prefixes both stages. `include_dir` resolves the
    /// includes of in-memory sources.
    pub fn load(desc: &ShaderProgramDesc, include_dir: &Path) -> Result<Self> {
        let (vertex, fragment, vertex_path, fragment_path) = match &desc.stages {
            ShaderStages::Files { vertex, fragment } => (
                preprocess(vertex)?,
                preprocess(fragment)?,
                Some(vertex.clone()),
                Some(fragment.clone()),
            ),
            ShaderStages::Raw { vertex, fragment } => {
                let label = |stage: &str| PathBuf::from(format!("<{}>.{stage}.wgsl", desc.name));
                (
                    expand_includes(&label("vert"), include_dir, vertex.clone())?,
                    expand_includes(&label("frag"), include_dir, fragment.clone())?,
                    None,
                    None,
                )
            }
        };
        let prelude = wgsl_prelude();
        Ok(Self {
            name: desc.name.clone(),
            vertex_path,
            fragment_path,
            vertex: format!("{prelude}{vertex}"),
            fragment: format!("{prelude}{fragment}"),
            uniform_slots: desc.uniform_slots.clone(),
            texture_slots: desc.texture_slots,
        })
    }

    pub fn vertex_stem(&self) -> Option<&str> {
        self.vertex_path.as_deref().and_then(stage_stem)
    }

    pub fn fragment_stem(&self) -> Option<&str> {
        self.fragment_path.as_deref().and_then(stage_stem)
    }
}

// ── preprocessor ──────────────────────────────────────────────────────────

/// Loads `path` and expands its `#include <...>` directives.
pub fn preprocess(path: &Path) -> Result<String> {
    let source = fs::read_to_string(path).map_err(|source| RendererError::ShaderIo {
        path: path.to_path_buf(),
        source,
    })?;
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    expand_includes(path, dir, source)
}

fn expand_includes(shader: &Path, dir: &Path, mut source: String) -> Result<String> {
    for _ in 0..MAX_INCLUDE_PASSES {
        let mut expanded = String::with_capacity(source.len());
        let mut found = false;

        for line in source.lines() {
            match parse_include(line) {
                Some(include) => {
                    found = true;
                    let include_path = dir.join(include);
                    let text = fs::read_to_string(&include_path).map_err(|_| {
                        RendererError::ShaderInclude {
                            shader: shader.to_path_buf(),
                            include: include_path.clone(),
                        }
                    })?;
                    expanded.push_str(&text);
                    if !text.ends_with('\n') {
                        expanded.push('\n');
                    }
                }
                None => {
                    expanded.push_str(line);
                    expanded.push('\n');
                }
            }
        }

        if !found {
            return Ok(source);
        }
        source = expanded;
    }

    if source.lines().any(|l| parse_include(l).is_some()) {
        return Err(RendererError::ShaderIncludeDepth(shader.to_path_buf()));
    }
    Ok(source)
}

/// `#include <relative/path>` → `relative/path`.
fn parse_include(line: &str) -> Option<&str> {
    let rest = line.trim_start().strip_prefix(INCLUDE_DIRECTIVE)?;
    let rest = rest.trim();
    let path = rest.strip_prefix('<')?.strip_suffix('>')?.trim();
    (!path.is_empty()).then_some(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("flare-shader-{}-{name}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(dir.join("include")).unwrap();
        dir
    }

    // ── directives ────────────────────────────────────────────────────────

    #[test]
    fn parse_include_accepts_angle_brackets_only() {
        assert_eq!(parse_include("#include <include/a.wgsl>"), Some("include/a.wgsl"));
        assert_eq!(parse_include("   #include   < b.wgsl >  "), Some("b.wgsl"));
        assert_eq!(parse_include("#include \"a.wgsl\""), None);
        assert_eq!(parse_include("#include <>"), None);
        assert_eq!(parse_include("// #include <a.wgsl>"), None);
    }

    // ── expansion ─────────────────────────────────────────────────────────

    #[test]
    fn nested_includes_resolve_against_top_level_directory() {
        let dir = scratch_dir("nested");
        fs::write(dir.join("include/a.wgsl"), "// a\n#include <include/b.wgsl>\n").unwrap();
        fs::write(dir.join("include/b.wgsl"), "// b").unwrap();
        fs::write(dir.join("Main.vert.wgsl"), "#include <include/a.wgsl>\nfn main() {}\n").unwrap();

        let out = preprocess(&dir.join("Main.vert.wgsl")).unwrap();
        assert_eq!(out, "// a\n// b\nfn main() {}\n");
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_include_is_reported() {
        let dir = scratch_dir("missing");
        fs::write(dir.join("Main.frag.wgsl"), "#include <include/nope.wgsl>\n").unwrap();

        let err = preprocess(&dir.join("Main.frag.wgsl")).unwrap_err();
        assert!(matches!(err, RendererError::ShaderInclude { ref include, .. } if include.ends_with("nope.wgsl")));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn cyclic_include_hits_pass_limit() {
        let dir = scratch_dir("cycle");
        fs::write(dir.join("include/loop.wgsl"), "#include <include/loop.wgsl>\n").unwrap();
        fs::write(dir.join("Main.vert.wgsl"), "#include <include/loop.wgsl>\n").unwrap();

        let err = preprocess(&dir.join("Main.vert.wgsl")).unwrap_err();
        assert!(matches!(err, RendererError::ShaderIncludeDepth(_)));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_stage_file_is_io_error() {
        let err = preprocess(Path::new("/definitely/not/here.vert.wgsl")).unwrap_err();
        assert!(matches!(err, RendererError::ShaderIo { .. }));
    }

    // ── manifest ──────────────────────────────────────────────────────────

    #[test]
    fn sources_carry_prelude_and_interface() {
        let dir = scratch_dir("load");
        fs::write(dir.join("Image.vert.wgsl"), "// vs\n").unwrap();
        fs::write(dir.join("Blur.frag.wgsl"), "// fs\n").unwrap();

        let entry = manifest_entry("BlurShader").unwrap();
        let sources = ShaderSources::load(&entry.desc(&dir), &dir).unwrap();
        assert!(sources.vertex.starts_with(&wgsl_prelude()));
        assert!(sources.fragment.ends_with("// fs\n"));
        assert_eq!(sources.uniform_slots, vec![0, 1]);
        assert_eq!(sources.vertex_stem(), Some("Image"));
        assert_eq!(sources.fragment_stem(), Some("Blur"));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn shipped_manifest_preprocesses() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("shaders");
        for entry in SHADER_MANIFEST {
            let sources = ShaderSources::load(&entry.desc(&dir), &dir)
                .unwrap_or_else(|e| panic!("{}: {e}", entry.name));
            assert!(!sources.vertex.contains(INCLUDE_DIRECTIVE), "{}", entry.name);
            assert!(!sources.fragment.contains(INCLUDE_DIRECTIVE), "{}", entry.name);
        }
    }

    // ── in-memory sources ─────────────────────────────────────────────────

    #[test]
    fn raw_sources_expand_includes_from_the_shader_directory() {
        let dir = scratch_dir("raw");
        fs::write(dir.join("include/common.wgsl"), "// common\n").unwrap();

        let desc = ShaderProgramDesc::from_source(
            "Inline",
            "#include <include/common.wgsl>\n// vs\n",
            "// fs\n",
            vec![0],
            0,
        );
        let sources = ShaderSources::load(&desc, &dir).unwrap();
        assert!(sources.vertex.ends_with("// common\n// vs\n"));
        assert!(sources.vertex.starts_with(&wgsl_prelude()));
        assert_eq!(sources.vertex_stem(), None);
        assert_eq!(sources.vertex_path, None);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn raw_source_include_errors_name_the_program() {
        let dir = scratch_dir("raw-missing");
        let desc = ShaderProgramDesc::from_source("Inline", "// vs\n", "#include <include/gone.wgsl>\n", vec![0], 0);

        let err = ShaderSources::load(&desc, &dir).unwrap_err();
        assert!(matches!(
            err,
            RendererError::ShaderInclude { ref shader, .. } if shader == Path::new("<Inline>.frag.wgsl")
        ));
        let _ = fs::remove_dir_all(&dir);
    }
}
