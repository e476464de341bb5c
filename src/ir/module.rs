//! Modules: function definitions, external declarations and metadata.

use std::collections::{BTreeMap, HashMap};

use super::function::Function;
use super::types::Type;

/// An external function declaration (`declare`).
#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    pub name: String,
    pub ret_ty: Type,
    pub params: Vec<Type>,
    pub varargs: bool,
}

/// One operand of a metadata node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataOperand {
    /// `ptr @name`
    Function(String),
    /// `!"text"`
    String(String),
    /// `i32 1`
    Int(Type, i64),
    /// `!3`
    Node(u32),
    /// `null`
    Null,
    /// Node body kept as written (debug info and other forms not modeled)
    Raw(String),
}

/// A named metadata list such as `!nvvm.annotations = !{!0, !1}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedMetadata {
    pub name: String,
    pub nodes: Vec<u32>,
}

/// Name of the named metadata list that marks kernel entry points.
pub const KERNEL_ANNOTATIONS: &str = "nvvm.annotations";

/// A translation unit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Module {
    /// Top-level lines kept verbatim ahead of the declarations: target
    /// description, type definitions, globals.
    pub header: Vec<String>,
    /// Attribute groups kept verbatim after the function definitions.
    pub attributes: Vec<String>,
    pub declarations: Vec<Declaration>,
    pub functions: Vec<Function>,
    pub named_metadata: Vec<NamedMetadata>,
    /// Numbered metadata nodes, by id.
    pub metadata: BTreeMap<u32, Vec<MetadataOperand>>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn function_mut(&mut self, name: &str) -> Option<&mut Function> {
        self.functions.iter_mut().find(|f| f.name == name)
    }

    pub fn function_index(&self, name: &str) -> Option<usize> {
        self.functions.iter().position(|f| f.name == name)
    }

    /// Whether `name` is defined or declared.
    pub fn has_symbol(&self, name: &str) -> bool {
        self.function(name).is_some() || self.declarations.iter().any(|d| d.name == name)
    }

    /// Insert `function` directly after the definition at `index`.
    pub fn insert_function_after(&mut self, index: usize, function: Function) {
        let pos = (index + 1).min(self.functions.len());
        self.functions.insert(pos, function);
    }

    /// Add a numbered metadata node and return its id.
    pub fn add_metadata_node(&mut self, operands: Vec<MetadataOperand>) -> u32 {
        let id = self.metadata.keys().next_back().map(|k| k + 1).unwrap_or(0);
        self.metadata.insert(id, operands);
        id
    }

    /// Append node `id` to the named list `name`, creating the list if needed.
    pub fn add_named_metadata(&mut self, name: &str, id: u32) {
        match self.named_metadata.iter_mut().find(|m| m.name == name) {
            Some(list) => list.nodes.push(id),
            None => self.named_metadata.push(NamedMetadata {
                name: name.to_string(),
                nodes: vec![id],
            }),
        }
    }

    /// Nodes referenced by the named list `name`.
    pub fn named_nodes<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a [MetadataOperand]> + 'a {
        self.named_metadata
            .iter()
            .filter(move |m| m.name == name)
            .flat_map(|m| m.nodes.iter())
            .filter_map(move |id| self.metadata.get(id).map(Vec::as_slice))
    }

    /// Mark `function` as a kernel entry point in `nvvm.annotations`.
    pub fn annotate_kernel(&mut self, function: &str) -> u32 {
        let id = self.add_metadata_node(vec![
            MetadataOperand::Function(function.to_string()),
            MetadataOperand::String("kernel".to_string()),
            MetadataOperand::Int(Type::I32, 1),
        ]);
        self.add_named_metadata(KERNEL_ANNOTATIONS, id);
        id
    }

    /// Link `other` into this module.
    ///
    /// Definitions from `other` are appended unless already defined here,
    /// declarations are dropped when a definition or declaration of the same
    /// name exists, and metadata nodes are renumbered past this module's ids.
    pub fn link(&mut self, other: Module) {
        let offset = self.metadata.keys().next_back().map(|k| k + 1).unwrap_or(0);
        let renumber: HashMap<u32, u32> = other.metadata.keys().map(|k| (*k, k + offset)).collect();

        for function in other.functions {
            if self.function(&function.name).is_some() {
                log::warn!("link: keeping existing definition of @{}", function.name);
                continue;
            }
            self.declarations.retain(|d| d.name != function.name);
            self.functions.push(function);
        }
        for decl in other.declarations {
            if !self.has_symbol(&decl.name) {
                self.declarations.push(decl);
            }
        }
        for (id, operands) in other.metadata {
            let operands = operands
                .into_iter()
                .map(|op| match op {
                    MetadataOperand::Node(n) => MetadataOperand::Node(renumber.get(&n).copied().unwrap_or(n)),
                    op => op,
                })
                .collect();
            self.metadata.insert(id + offset, operands);
        }
        for line in other.header {
            if !self.header.contains(&line) {
                self.header.push(line);
            }
        }
        for named in other.named_metadata {
            for id in named.nodes {
                self.add_named_metadata(&named.name, id + offset);
            }
        }
    }
}
