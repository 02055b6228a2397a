//! Compiler interface and linking.
//!
//! Per-format compilers are external. They receive one load record at a time,
//! in compile order, and return registration source. [`link`] drives them
//! over a tree and concatenates the result.

use serde::{Deserialize, Serialize};

use crate::error::{GraphError, Result};
use crate::order::order;
use crate::record::LoadRecord;
use crate::tree::ResolvedTree;

/// Options handed to every compiler invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileOptions {
    pub source_maps: bool,
    pub minify: bool,
    /// Name the output bundle is written to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_name: Option<String>,
}

/// Output of compiling one module.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompiledModule {
    pub source: String,
    pub source_map: Option<String>,
}

/// A format-specific compiler.
///
/// Implementations dispatch on [`LoadRecord::format`]; a compiler that cannot
/// handle a record returns [`GraphError::Compile`].
pub trait Compiler: Send + Sync {
    fn compile(&self, record: &LoadRecord, options: &CompileOptions) -> Result<CompiledModule>;
}

impl<F> Compiler for F
where
    F: Fn(&LoadRecord, &CompileOptions) -> Result<CompiledModule> + Send + Sync,
{
    fn compile(&self, record: &LoadRecord, options: &CompileOptions) -> Result<CompiledModule> {
        self(record, options)
    }
}

/// Concatenated output for one tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkedBundle {
    pub source: String,
    /// Compiled modules in output order.
    pub modules: Vec<String>,
    pub entry_points: Vec<String>,
    /// Per-module source maps, aligned with `modules`.
    pub source_maps: Vec<Option<String>>,
}

/// Compile every present record of `tree` in compile order and join the
/// output with newlines.
pub fn link<S: AsRef<str>>(
    tree: &ResolvedTree,
    entries: &[S],
    compiler: &dyn Compiler,
    options: &CompileOptions,
) -> Result<LinkedBundle> {
    let order = order(tree, entries)?;
    let records = tree.compile_records(&order.modules)?;

    let mut outputs = Vec::with_capacity(records.len());
    let mut modules = Vec::with_capacity(records.len());
    let mut source_maps = Vec::with_capacity(records.len());
    for record in records {
        if record.is_conditional() {
            return Err(GraphError::Compile {
                name: record.name.clone(),
                message: "conditional records must be inlined before compiling".to_string(),
            });
        }
        let compiled = compiler.compile(record, options)?;
        outputs.push(compiled.source);
        source_maps.push(compiled.source_map);
        modules.push(record.name.clone());
    }

    Ok(LinkedBundle {
        source: outputs.join("\n"),
        modules,
        entry_points: order.entry_points,
        source_maps,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Conditional, ModuleFormat, TreeEntry};

    fn register(record: &LoadRecord, _options: &CompileOptions) -> Result<CompiledModule> {
        Ok(CompiledModule {
            source: format!("System.register('{}', [{}]);", record.name, record.deps.join(",")),
            source_map: None,
        })
    }

    #[test]
    fn test_link_concatenates_in_order() {
        let mut tree = ResolvedTree::new();
        tree.insert(
            "app",
            TreeEntry::Present(
                LoadRecord::builder("app")
                    .format(ModuleFormat::Esm)
                    .dep("lib", "lib")
                    .source("")
                    .build(),
            ),
        );
        tree.insert(
            "lib",
            TreeEntry::Present(LoadRecord::builder("lib").format(ModuleFormat::Esm).source("").build()),
        );
        tree.insert("native", TreeEntry::Excluded);

        let bundle = link(&tree, &["app"], &register, &CompileOptions::default()).unwrap();

        assert_eq!(bundle.modules, vec!["lib", "app"]);
        assert_eq!(
            bundle.source,
            "System.register('lib', []);\nSystem.register('app', [lib]);"
        );
        assert_eq!(bundle.source_maps, vec![None, None]);
    }

    #[test]
    fn test_link_rejects_raw_conditionals() {
        let mut tree = ResolvedTree::new();
        tree.insert(
            "impl#?env|browser",
            TreeEntry::Present(LoadRecord::conditional(
                "impl#?env|browser",
                Conditional::Boolean {
                    condition: "env|browser".to_string(),
                    branch: "impl".to_string(),
                },
                "h",
            )),
        );

        assert!(matches!(
            link(&tree, &[] as &[&str], &register, &CompileOptions::default()),
            Err(GraphError::Compile { .. })
        ));
    }
}
