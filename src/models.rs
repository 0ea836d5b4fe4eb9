use serde::{Deserialize, Serialize};

/// Dataset row / 数据集
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Dataset {
    pub id: i64,
    pub identifier: String,
    pub name: String,
    pub description: Option<String>,
    pub protocol_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ObservableFeature {
    pub id: i64,
    pub identifier: String,
    pub name: String,
    pub data_type: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Characteristic {
    pub id: i64,
    pub identifier: String,
    pub name: String,
}

/// Protocol tree node: features first, then nested protocols / 协议树节点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Protocol {
    pub id: i64,
    pub identifier: String,
    pub name: String,
    pub description: Option<String>,
    pub features: Vec<ObservableFeature>,
    pub subprotocols: Vec<Protocol>,
}

impl Protocol {
    /// All features of the tree, depth-first, each feature once / 深度优先收集所有特征（去重）
    pub fn flatten_features(&self) -> Vec<&ObservableFeature> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        self.collect_features(&mut seen, &mut out);
        out
    }

    fn collect_features<'a>(
        &'a self,
        seen: &mut std::collections::HashSet<i64>,
        out: &mut Vec<&'a ObservableFeature>,
    ) {
        for feature in &self.features {
            if seen.insert(feature.id) {
                out.push(feature);
            }
        }
        for sub in &self.subprotocols {
            sub.collect_features(seen, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feature(id: i64, name: &str) -> ObservableFeature {
        ObservableFeature {
            id,
            identifier: format!("f{}", id),
            name: name.to_string(),
            data_type: "string".to_string(),
            description: None,
        }
    }

    fn protocol(id: i64, features: Vec<ObservableFeature>, subprotocols: Vec<Protocol>) -> Protocol {
        Protocol {
            id,
            identifier: format!("p{}", id),
            name: format!("Protocol {}", id),
            description: None,
            features,
            subprotocols,
        }
    }

    #[test]
    fn test_flatten_features_depth_first_without_duplicates() {
        let tree = protocol(
            1,
            vec![feature(10, "age")],
            vec![
                protocol(2, vec![feature(11, "weight"), feature(10, "age")], vec![]),
                protocol(3, vec![feature(12, "height")], vec![]),
            ],
        );

        let names: Vec<&str> = tree.flatten_features().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["age", "weight", "height"]);
    }
}
