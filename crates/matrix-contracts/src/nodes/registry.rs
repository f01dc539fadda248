use indexmap::IndexMap;
use serde::Serialize;

use crate::slots::SlotCount;

pub const NODE_CATEGORY: &str = "Custom/Matrix";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeSpec {
    pub id: String,
    pub display_name: String,
    pub category: String,
    pub slots: Option<SlotCount>,
    pub output_node: bool,
}

#[derive(Debug, Clone)]
pub struct NodeRegistry {
    nodes: IndexMap<String, NodeSpec>,
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

impl NodeRegistry {
    pub fn new(nodes: Option<IndexMap<String, NodeSpec>>) -> Self {
        Self {
            nodes: nodes.unwrap_or_else(default_nodes),
        }
    }

    pub fn get(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.get(id)
    }

    pub fn list(&self) -> impl Iterator<Item = &NodeSpec> {
        self.nodes.values()
    }

    pub fn by_category(&self, category: &str) -> Vec<NodeSpec> {
        self.nodes
            .values()
            .filter(|node| node.category == category)
            .cloned()
            .collect()
    }
}

fn default_nodes() -> IndexMap<String, NodeSpec> {
    let mut map = IndexMap::new();

    let mut insert = |id: &str, display_name: &str, slots: Option<SlotCount>, output_node: bool| {
        map.insert(
            id.to_string(),
            NodeSpec {
                id: id.to_string(),
                display_name: display_name.to_string(),
                category: NODE_CATEGORY.to_string(),
                slots,
                output_node,
            },
        );
    };

    insert(
        "MatrixImageLoader_Index",
        "Matrix Image Loader (Index 10)",
        Some(SlotCount::Ten),
        false,
    );
    insert(
        "MatrixImageLoader_Direct",
        "Matrix Image Loader (String 10)",
        Some(SlotCount::Ten),
        false,
    );
    insert(
        "MatrixPromptSplitter5",
        "Matrix Prompt Splitter (5)",
        Some(SlotCount::Five),
        false,
    );
    insert(
        "MatrixPromptSplitter",
        "Matrix Prompt Splitter (10)",
        Some(SlotCount::Ten),
        false,
    );
    insert("MatrixTextExtractor", "Matrix Text Extractor", None, false);
    insert("MatrixStringChopper", "Matrix String Chopper", None, false);
    insert(
        "MatrixAssetGrid5",
        "Matrix Asset Grid (5)",
        Some(SlotCount::Five),
        false,
    );
    insert(
        "MatrixAssetGrid10",
        "Matrix Asset Grid (10)",
        Some(SlotCount::Ten),
        false,
    );
    insert("MatrixDatasetSaver", "Matrix Dataset Saver", None, true);
    insert("MatrixVideoCombine", "Matrix Video Combine", None, true);
    insert(
        "MatrixTextEncodeQwen5",
        "Qwen Encode (5 Imgs)",
        Some(SlotCount::Five),
        false,
    );
    insert(
        "MatrixTextEncodeQwen10",
        "Qwen Encode (10 Imgs) (Experimental)",
        Some(SlotCount::Ten),
        false,
    );

    map
}
