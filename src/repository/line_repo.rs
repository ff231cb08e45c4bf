// ==========================================
// 网箱投喂控制系统 - 投喂线目录
// ==========================================
// 用途: 按 line_id 查询投喂线配置 (风机时序、下料器能力、网箱路由)
// ==========================================

use crate::domain::line::LineProfile;
use crate::repository::error::{RepositoryError, RepositoryResult};
use std::collections::HashMap;

pub trait LineCatalog: Send + Sync {
    fn find_line(&self, line_id: &str) -> RepositoryResult<Option<LineProfile>>;

    fn line_ids(&self) -> RepositoryResult<Vec<String>>;
}

/// 由配置构建的只读目录
#[derive(Debug, Clone, Default)]
pub struct InMemoryLineCatalog {
    lines: HashMap<String, LineProfile>,
}

impl InMemoryLineCatalog {
    /// 构建目录；重复 line_id 或无效配置返回错误
    pub fn new(lines: Vec<LineProfile>) -> RepositoryResult<Self> {
        let mut map = HashMap::with_capacity(lines.len());
        for line in lines {
            line.validate()
                .map_err(|e| RepositoryError::ValidationError(e.to_string()))?;
            if map.contains_key(&line.line_id) {
                return Err(RepositoryError::UniqueConstraintViolation(format!(
                    "重复的投喂线: {}",
                    line.line_id
                )));
            }
            map.insert(line.line_id.clone(), line);
        }
        Ok(Self { lines: map })
    }
}

impl LineCatalog for InMemoryLineCatalog {
    fn find_line(&self, line_id: &str) -> RepositoryResult<Option<LineProfile>> {
        Ok(self.lines.get(line_id).cloned())
    }

    fn line_ids(&self) -> RepositoryResult<Vec<String>> {
        let mut ids: Vec<String> = self.lines.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::line::CageRoute;

    fn line(id: &str) -> LineProfile {
        LineProfile {
            line_id: id.to_string(),
            name: String::new(),
            doser_capacity_kg_per_min: 20.0,
            blow_before_secs: 3.0,
            blow_after_secs: 4.0,
            routes: vec![CageRoute {
                cage_id: "C01".to_string(),
                slot: 1,
                transport_time_secs: 20.0,
            }],
        }
    }

    #[test]
    fn test_catalog_lookup() {
        let catalog = InMemoryLineCatalog::new(vec![line("L2"), line("L1")]).unwrap();
        assert!(catalog.find_line("L1").unwrap().is_some());
        assert!(catalog.find_line("L9").unwrap().is_none());
        assert_eq!(catalog.line_ids().unwrap(), vec!["L1", "L2"]);
    }

    #[test]
    fn test_duplicate_line_rejected() {
        assert!(matches!(
            InMemoryLineCatalog::new(vec![line("L1"), line("L1")]),
            Err(RepositoryError::UniqueConstraintViolation(_))
        ));
    }
}
