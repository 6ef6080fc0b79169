//! Loading of OpenCV cascade XML files.
//!
//! Two serializations exist in the wild: the legacy haartraining output
//! (`type_id="opencv-haar-classifier"`, used by the stock fist profile)
//! with per-node inline features, and the traincascade output
//! (`type_id="opencv-cascade-classifier"`) with a shared feature table.
//! Both parse into the same [`CascadeModel`]; tilted features are rejected
//! since the detector evaluates upright rects only.

use std::fs;
use std::path::{Path, PathBuf};

use roxmltree::{Document, Node as XmlNode};
use thiserror::Error;

use super::cascade_model::{Branch, CascadeModel, Feature, Stage, Tree, TreeNode, WeightedRect};

#[derive(Error, Debug)]
pub enum CascadeLoadError {
    #[error("failed to read cascade file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cascade file is not well-formed XML: {0}")]
    Xml(#[from] roxmltree::Error),
    #[error("unsupported cascade variant: {0}")]
    Unsupported(String),
    #[error("tilted features are not supported")]
    TiltedFeature,
    #[error("malformed cascade data: {0}")]
    Malformed(String),
}

/// Reads and parses a cascade profile from disk.
pub fn load_cascade(path: &Path) -> Result<CascadeModel, CascadeLoadError> {
    let text = fs::read_to_string(path).map_err(|source| CascadeLoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_cascade(&text)
}

/// Parses a cascade from XML text.
pub fn parse_cascade(text: &str) -> Result<CascadeModel, CascadeLoadError> {
    let document = Document::parse(text)?;
    let root = document.root_element();
    let cascade = element_children(root)
        .next()
        .ok_or_else(|| malformed("document holds no cascade element"))?;
    match cascade.attribute("type_id") {
        Some("opencv-haar-classifier") => parse_legacy(cascade),
        Some("opencv-cascade-classifier") => parse_modern(cascade),
        Some(other) => Err(CascadeLoadError::Unsupported(format!("type_id {other}"))),
        None => Err(CascadeLoadError::Unsupported(
            "missing type_id attribute".into(),
        )),
    }
}

// ── legacy haartraining format ──────────────────────────────────────────

fn parse_legacy(cascade: XmlNode) -> Result<CascadeModel, CascadeLoadError> {
    let size = child_text(cascade, "size")?;
    let mut parts = size.split_whitespace();
    let width = parse_dimension(parts.next(), "window width")?;
    let height = parse_dimension(parts.next(), "window height")?;

    let mut stages = Vec::new();
    for stage in element_children(named_child(cascade, "stages")?) {
        stages.push(parse_legacy_stage(stage)?);
    }
    if stages.is_empty() {
        return Err(malformed("cascade has no stages"));
    }
    let model = CascadeModel::new(width, height, stages);
    check_rects_fit_window(&model)?;
    Ok(model)
}

fn parse_legacy_stage(stage: XmlNode) -> Result<Stage, CascadeLoadError> {
    let threshold = parse_float(child_text(stage, "stage_threshold")?, "stage threshold")?;
    let mut trees = Vec::new();
    for tree in element_children(named_child(stage, "trees")?) {
        trees.push(parse_legacy_tree(tree)?);
    }
    if trees.is_empty() {
        return Err(malformed("stage has no trees"));
    }
    Ok(Stage { threshold, trees })
}

fn parse_legacy_tree(tree: XmlNode) -> Result<Tree, CascadeLoadError> {
    let elements: Vec<XmlNode> = element_children(tree).collect();
    let count = elements.len();
    let mut nodes = Vec::with_capacity(count);
    for (index, element) in elements.into_iter().enumerate() {
        let feature = parse_legacy_feature(named_child(element, "feature")?)?;
        let threshold = parse_float(child_text(element, "threshold")?, "node threshold")?;
        let left = parse_legacy_branch(element, "left_val", "left_node", index, count)?;
        let right = parse_legacy_branch(element, "right_val", "right_node", index, count)?;
        nodes.push(TreeNode {
            feature,
            threshold,
            left,
            right,
        });
    }
    if nodes.is_empty() {
        return Err(malformed("tree has no nodes"));
    }
    Ok(Tree { nodes })
}

fn parse_legacy_branch(
    node: XmlNode,
    value_tag: &str,
    node_tag: &str,
    index: usize,
    count: usize,
) -> Result<Branch, CascadeLoadError> {
    if let Some(text) = optional_child_text(node, value_tag) {
        return Ok(Branch::Value(parse_float(text, value_tag)?));
    }
    if let Some(text) = optional_child_text(node, node_tag) {
        let target = parse_index(text, node_tag)?;
        if target <= index || target >= count {
            return Err(malformed(format!(
                "branch target {target} escapes its tree (node {index} of {count})"
            )));
        }
        return Ok(Branch::Node(target));
    }
    Err(malformed(format!("node has neither {value_tag} nor {node_tag}")))
}

fn parse_legacy_feature(feature: XmlNode) -> Result<Feature, CascadeLoadError> {
    if let Some(tilted) = optional_child_text(feature, "tilted") {
        if tilted.trim() != "0" {
            return Err(CascadeLoadError::TiltedFeature);
        }
    }
    let mut rects = Vec::new();
    for rect in element_children(named_child(feature, "rects")?) {
        rects.push(parse_weighted_rect(rect)?);
    }
    if rects.is_empty() {
        return Err(malformed("feature has no rects"));
    }
    Ok(Feature { rects })
}

fn parse_weighted_rect(rect: XmlNode) -> Result<WeightedRect, CascadeLoadError> {
    let text = rect
        .text()
        .ok_or_else(|| malformed("empty rect element"))?;
    let values: Vec<&str> = text.split_whitespace().collect();
    if values.len() != 5 {
        return Err(malformed(format!("rect needs 5 values, found {}", values.len())));
    }
    Ok(WeightedRect {
        x: parse_coordinate(values[0], "rect x")?,
        y: parse_coordinate(values[1], "rect y")?,
        width: parse_coordinate(values[2], "rect width")?,
        height: parse_coordinate(values[3], "rect height")?,
        weight: parse_float(values[4], "rect weight")?,
    })
}

/// Every feature rect must lie inside the trained window; the detector
/// offsets scan windows by these rects without re-checking bounds.
fn check_rects_fit_window(model: &CascadeModel) -> Result<(), CascadeLoadError> {
    let width = u64::from(model.window_width());
    let height = u64::from(model.window_height());
    for stage in model.stages() {
        for tree in &stage.trees {
            for node in &tree.nodes {
                for rect in &node.feature.rects {
                    if u64::from(rect.x) + u64::from(rect.width) > width
                        || u64::from(rect.y) + u64::from(rect.height) > height
                    {
                        return Err(malformed(format!(
                            "rect {} {} {} {} escapes the {}x{} trained window",
                            rect.x, rect.y, rect.width, rect.height, width, height
                        )));
                    }
                }
            }
        }
    }
    Ok(())
}

// ── modern traincascade format ──────────────────────────────────────────

fn parse_modern(cascade: XmlNode) -> Result<CascadeModel, CascadeLoadError> {
    let stage_type = child_text(cascade, "stageType")?.trim().to_owned();
    if stage_type != "BOOST" {
        return Err(CascadeLoadError::Unsupported(format!(
            "stage type {stage_type}"
        )));
    }
    let feature_type = child_text(cascade, "featureType")?.trim().to_owned();
    if feature_type != "HAAR" {
        return Err(CascadeLoadError::Unsupported(format!(
            "feature type {feature_type}"
        )));
    }
    let width = parse_dimension(Some(child_text(cascade, "width")?.trim()), "window width")?;
    let height = parse_dimension(Some(child_text(cascade, "height")?.trim()), "window height")?;

    let features = parse_feature_table(named_child(cascade, "features")?)?;

    let mut stages = Vec::new();
    for stage in element_children(named_child(cascade, "stages")?) {
        stages.push(parse_modern_stage(stage, &features)?);
    }
    if stages.is_empty() {
        return Err(malformed("cascade has no stages"));
    }
    let model = CascadeModel::new(width, height, stages);
    check_rects_fit_window(&model)?;
    Ok(model)
}

fn parse_feature_table(table: XmlNode) -> Result<Vec<Feature>, CascadeLoadError> {
    let mut features = Vec::new();
    for feature in element_children(table) {
        features.push(parse_legacy_feature(feature)?);
    }
    if features.is_empty() {
        return Err(malformed("empty feature table"));
    }
    Ok(features)
}

fn parse_modern_stage(stage: XmlNode, features: &[Feature]) -> Result<Stage, CascadeLoadError> {
    let threshold = parse_float(child_text(stage, "stageThreshold")?, "stage threshold")?;
    let mut trees = Vec::new();
    for weak in element_children(named_child(stage, "weakClassifiers")?) {
        trees.push(parse_modern_tree(weak, features)?);
    }
    if trees.is_empty() {
        return Err(malformed("stage has no weak classifiers"));
    }
    Ok(Stage { threshold, trees })
}

fn parse_modern_tree(weak: XmlNode, features: &[Feature]) -> Result<Tree, CascadeLoadError> {
    let internal: Vec<&str> = child_text(weak, "internalNodes")?
        .split_whitespace()
        .collect();
    let leaves: Vec<f32> = child_text(weak, "leafValues")?
        .split_whitespace()
        .map(|value| parse_float(value, "leaf value"))
        .collect::<Result<_, _>>()?;
    if internal.is_empty() || internal.len() % 4 != 0 {
        return Err(malformed(format!(
            "internalNodes length {} is not a multiple of 4",
            internal.len()
        )));
    }

    let count = internal.len() / 4;
    let mut nodes = Vec::with_capacity(count);
    for index in 0..count {
        let chunk = &internal[index * 4..index * 4 + 4];
        let feature_index = parse_index(chunk[2], "feature index")?;
        let feature = features
            .get(feature_index)
            .cloned()
            .ok_or_else(|| malformed(format!("feature index {feature_index} out of range")))?;
        nodes.push(TreeNode {
            feature,
            threshold: parse_float(chunk[3], "node threshold")?,
            left: parse_modern_branch(chunk[0], index, count, &leaves)?,
            right: parse_modern_branch(chunk[1], index, count, &leaves)?,
        });
    }
    Ok(Tree { nodes })
}

/// Branch encoding of traincascade files: positive values are forward node
/// indices, zero and negatives index the leaf table as `-value`.
fn parse_modern_branch(
    raw: &str,
    index: usize,
    count: usize,
    leaves: &[f32],
) -> Result<Branch, CascadeLoadError> {
    let value: i64 = raw
        .trim()
        .parse()
        .map_err(|_| malformed(format!("invalid branch value {raw:?}")))?;
    if value > 0 {
        let target = value as usize;
        if target <= index || target >= count {
            return Err(malformed(format!(
                "branch target {target} escapes its tree (node {index} of {count})"
            )));
        }
        Ok(Branch::Node(target))
    } else {
        let leaf = (-value) as usize;
        let leaf_value = leaves
            .get(leaf)
            .copied()
            .ok_or_else(|| malformed(format!("leaf index {leaf} out of range")))?;
        Ok(Branch::Value(leaf_value))
    }
}

// ── parsing helpers ─────────────────────────────────────────────────────

fn element_children<'a, 'input>(
    node: XmlNode<'a, 'input>,
) -> impl Iterator<Item = XmlNode<'a, 'input>> {
    node.children().filter(|child| child.is_element())
}

fn named_child<'a, 'input>(
    node: XmlNode<'a, 'input>,
    name: &str,
) -> Result<XmlNode<'a, 'input>, CascadeLoadError> {
    node.children()
        .find(|child| child.has_tag_name(name))
        .ok_or_else(|| malformed(format!("missing <{name}> element")))
}

fn child_text<'a>(node: XmlNode<'a, '_>, name: &str) -> Result<&'a str, CascadeLoadError> {
    named_child(node, name)?
        .text()
        .ok_or_else(|| malformed(format!("<{name}> holds no text")))
}

fn optional_child_text<'a>(node: XmlNode<'a, '_>, name: &str) -> Option<&'a str> {
    node.children()
        .find(|child| child.has_tag_name(name))
        .and_then(|child| child.text())
}

fn parse_float(text: &str, what: &str) -> Result<f32, CascadeLoadError> {
    text.trim()
        .parse()
        .map_err(|_| malformed(format!("invalid {what}: {text:?}")))
}

fn parse_index(text: &str, what: &str) -> Result<usize, CascadeLoadError> {
    text.trim()
        .parse()
        .map_err(|_| malformed(format!("invalid {what}: {text:?}")))
}

/// Rect coordinates are written as floats ("3." style) but must be
/// non-negative integers of the trained window.
fn parse_coordinate(text: &str, what: &str) -> Result<u32, CascadeLoadError> {
    let value: f32 = parse_float(text, what)?;
    if value < 0.0 || value.fract() != 0.0 {
        return Err(malformed(format!("invalid {what}: {text:?}")));
    }
    Ok(value as u32)
}

fn parse_dimension(text: Option<&str>, what: &str) -> Result<u32, CascadeLoadError> {
    let value: u32 = text
        .ok_or_else(|| malformed(format!("missing {what}")))?
        .trim()
        .parse()
        .map_err(|_| malformed(format!("invalid {what}")))?;
    if value == 0 {
        return Err(malformed(format!("{what} must be positive")));
    }
    Ok(value)
}

fn malformed(detail: impl Into<String>) -> CascadeLoadError {
    CascadeLoadError::Malformed(detail.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEGACY_XML: &str = r#"<?xml version="1.0"?>
<opencv_storage>
<fist type_id="opencv-haar-classifier">
  <size>24 24</size>
  <stages>
    <_>
      <trees>
        <_>
          <_>
            <feature>
              <rects>
                <_>3 7 18 10 -1.</_>
                <_>3 12 18 5 2.</_></rects>
              <tilted>0</tilted></feature>
            <threshold>1.1384999752044678e-01</threshold>
            <left_val>-7.1329998970031738e-01</left_val>
            <right_node>1</right_node></_>
          <_>
            <feature>
              <rects>
                <_>0 0 24 24 1.</_></rects>
              <tilted>0</tilted></feature>
            <threshold>0.</threshold>
            <left_val>-1.</left_val>
            <right_val>8.3799999952316284e-01</right_val></_></_>
      </trees>
      <stage_threshold>-1.0722150802612305e+00</stage_threshold>
      <parent>-1</parent>
      <next>-1</next></_>
  </stages></fist>
</opencv_storage>
"#;

    const MODERN_XML: &str = r#"<?xml version="1.0"?>
<opencv_storage>
<cascade type_id="opencv-cascade-classifier">
  <stageType>BOOST</stageType>
  <featureType>HAAR</featureType>
  <height>20</height>
  <width>20</width>
  <stages>
    <_>
      <maxWeakCount>2</maxWeakCount>
      <stageThreshold>-1.3442809581756592e+00</stageThreshold>
      <weakClassifiers>
        <_>
          <internalNodes>0 -1 0 -3.1511999666690826e-02</internalNodes>
          <leafValues>2.0875380039215088e+00 -2.2172100543975830e+00</leafValues></_>
        <_>
          <internalNodes>0 -1 1 1.2396000364422798e-02</internalNodes>
          <leafValues>1. -1.</leafValues></_>
      </weakClassifiers></_>
  </stages>
  <features>
    <_>
      <rects>
        <_>6 4 12 9 -1.</_>
        <_>6 7 12 3 3.</_></rects></_>
    <_>
      <rects>
        <_>0 0 10 20 1.</_></rects></_>
  </features></cascade>
</opencv_storage>
"#;

    #[test]
    fn test_legacy_cascade_parses() {
        let model = parse_cascade(LEGACY_XML).unwrap();
        assert_eq!(model.window_width(), 24);
        assert_eq!(model.window_height(), 24);
        assert_eq!(model.stage_count(), 1);

        let stage = &model.stages()[0];
        assert!((stage.threshold - -1.072_215).abs() < 1e-5);
        assert_eq!(stage.trees.len(), 1);

        let tree = &stage.trees[0];
        assert_eq!(tree.nodes.len(), 2);
        assert_eq!(tree.nodes[0].right, Branch::Node(1));
        assert_eq!(tree.nodes[0].feature.rects.len(), 2);
        assert_eq!(tree.nodes[0].feature.rects[1].weight, 2.0);
        assert_eq!(tree.nodes[1].left, Branch::Value(-1.0));
    }

    #[test]
    fn test_modern_cascade_parses_with_shared_features() {
        let model = parse_cascade(MODERN_XML).unwrap();
        assert_eq!(model.window_width(), 20);
        assert_eq!(model.window_height(), 20);
        assert_eq!(model.stage_count(), 1);

        let stage = &model.stages()[0];
        assert_eq!(stage.trees.len(), 2);
        // Stumps resolve their leaf table and shared feature.
        let first = &stage.trees[0].nodes[0];
        assert_eq!(first.left, Branch::Value(2.087_538));
        assert_eq!(first.feature.rects.len(), 2);
        let second = &stage.trees[1].nodes[0];
        assert_eq!(second.feature.rects[0].width, 10);
    }

    #[test]
    fn test_unknown_type_id_is_unsupported() {
        let xml = r#"<opencv_storage><c type_id="opencv-matrix"><rows>1</rows></c></opencv_storage>"#;
        assert!(matches!(
            parse_cascade(xml),
            Err(CascadeLoadError::Unsupported(_))
        ));
    }

    #[test]
    fn test_tilted_feature_is_rejected() {
        let xml = LEGACY_XML.replace("<tilted>0</tilted>", "<tilted>1</tilted>");
        assert!(matches!(
            parse_cascade(&xml),
            Err(CascadeLoadError::TiltedFeature)
        ));
    }

    #[test]
    fn test_backward_branch_is_rejected() {
        let xml = LEGACY_XML.replace("<right_node>1</right_node>", "<right_node>0</right_node>");
        assert!(matches!(
            parse_cascade(&xml),
            Err(CascadeLoadError::Malformed(_))
        ));
    }

    #[test]
    fn test_rect_escaping_the_window_is_rejected() {
        let xml = LEGACY_XML.replace("<_>0 0 24 24 1.</_>", "<_>1000 0 4 4 1.</_>");
        assert!(matches!(
            parse_cascade(&xml),
            Err(CascadeLoadError::Malformed(_))
        ));

        let xml = MODERN_XML.replace("<_>0 0 10 20 1.</_>", "<_>0 15 10 6 1.</_>");
        assert!(matches!(
            parse_cascade(&xml),
            Err(CascadeLoadError::Malformed(_))
        ));
    }

    #[test]
    fn test_truncated_document_is_an_xml_error() {
        assert!(matches!(
            parse_cascade("<opencv_storage><fist"),
            Err(CascadeLoadError::Xml(_))
        ));
    }

    #[test]
    fn test_missing_stages_is_malformed() {
        let xml = r#"<opencv_storage>
<fist type_id="opencv-haar-classifier"><size>24 24</size></fist>
</opencv_storage>"#;
        assert!(matches!(
            parse_cascade(xml),
            Err(CascadeLoadError::Malformed(_))
        ));
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let err = load_cascade(Path::new("/nonexistent/profile.xml")).unwrap_err();
        assert!(matches!(err, CascadeLoadError::Io { .. }));
    }

    #[test]
    fn test_load_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fist.xml");
        std::fs::write(&path, LEGACY_XML).unwrap();

        let model = load_cascade(&path).unwrap();
        assert_eq!(model.stage_count(), 1);
    }
}
