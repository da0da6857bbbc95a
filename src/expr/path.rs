//! 点分路径：`order.items[0].price`

use serde_json::{Map, Value};
use std::fmt;

/// 路径片段
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    Key(String),
    Index(usize),
}

/// 解析后的数据路径，空路径指向根
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Path {
    segments: Vec<Segment>,
}

impl Path {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn from_segments(segments: Vec<Segment>) -> Self {
        Self { segments }
    }

    /// 解析 `a.b[0].c` 形式的路径，空串表示根
    pub fn parse(input: &str) -> Self {
        let mut segments = Vec::new();
        for part in input.split('.').map(str::trim).filter(|p| !p.is_empty()) {
            // 处理数组索引 item[0]
            let mut rest = part;
            if let Some(bracket) = rest.find('[') {
                let name = &rest[..bracket];
                if !name.is_empty() {
                    segments.push(Segment::Key(name.to_string()));
                }
                rest = &rest[bracket..];
                while let Some(stripped) = rest.strip_prefix('[') {
                    let Some(close) = stripped.find(']') else {
                        segments.push(Segment::Key(rest.to_string()));
                        break;
                    };
                    let inner = stripped[..close].trim().trim_matches(|c| c == '\'' || c == '"');
                    match inner.parse::<usize>() {
                        Ok(index) => segments.push(Segment::Index(index)),
                        Err(_) => segments.push(Segment::Key(inner.to_string())),
                    }
                    rest = &stripped[close + 1..];
                }
            } else {
                segments.push(Segment::Key(rest.to_string()));
            }
        }
        Self { segments }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn first_key(&self) -> Option<&str> {
        match self.segments.first() {
            Some(Segment::Key(key)) => Some(key),
            _ => None,
        }
    }

    /// 去掉首段后的路径
    pub fn tail(&self) -> Path {
        Self {
            segments: self.segments.iter().skip(1).cloned().collect(),
        }
    }

    pub fn child(&self, segment: Segment) -> Path {
        let mut segments = self.segments.clone();
        segments.push(segment);
        Self { segments }
    }

    /// 按路径读取，任一段缺失返回 `None`
    pub fn get<'v>(&self, value: &'v Value) -> Option<&'v Value> {
        let mut current = value;
        for segment in &self.segments {
            current = match (segment, current) {
                (Segment::Key(key), Value::Object(map)) => map.get(key)?,
                (Segment::Index(index), Value::Array(items)) => items.get(*index)?,
                // 对象允许以数字字符串作为键
                (Segment::Index(index), Value::Object(map)) => map.get(&index.to_string())?,
                (Segment::Key(key), Value::Array(items)) => items.get(key.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// 按路径写入，沿途创建缺失的对象；返回旧值
    pub fn set(&self, target: &mut Value, new_value: Value) -> Option<Value> {
        let Some((last, parents)) = self.segments.split_last() else {
            return Some(std::mem::replace(target, new_value));
        };
        let mut current = target;
        for segment in parents {
            current = descend_or_create(current, segment)?;
        }
        match last {
            Segment::Key(key) => {
                if !current.is_object() {
                    *current = Value::Object(Map::new());
                }
                current.as_object_mut().and_then(|map| map.insert(key.clone(), new_value))
            }
            Segment::Index(index) => {
                if !current.is_array() {
                    *current = Value::Array(Vec::new());
                }
                let items = current.as_array_mut()?;
                if *index >= items.len() {
                    items.resize(*index + 1, Value::Null);
                }
                Some(std::mem::replace(&mut items[*index], new_value))
            }
        }
    }

    /// 删除路径上的值；返回被删除的值
    pub fn remove(&self, target: &mut Value) -> Option<Value> {
        let (last, parents) = self.segments.split_last()?;
        let mut current = target;
        for segment in parents {
            current = match (segment, current) {
                (Segment::Key(key), Value::Object(map)) => map.get_mut(key)?,
                (Segment::Index(index), Value::Array(items)) => items.get_mut(*index)?,
                _ => return None,
            };
        }
        match (last, current) {
            (Segment::Key(key), Value::Object(map)) => map.remove(key),
            (Segment::Index(index), Value::Array(items)) if *index < items.len() => {
                Some(std::mem::replace(&mut items[*index], Value::Null))
            }
            _ => None,
        }
    }
}

fn descend_or_create<'v>(current: &'v mut Value, segment: &Segment) -> Option<&'v mut Value> {
    match segment {
        Segment::Key(key) => {
            if !current.is_object() {
                *current = Value::Object(Map::new());
            }
            current
                .as_object_mut()
                .map(|map| map.entry(key.clone()).or_insert(Value::Null))
        }
        Segment::Index(index) => {
            if !current.is_array() {
                *current = Value::Array(Vec::new());
            }
            current.as_array_mut().and_then(|items| {
                if *index >= items.len() {
                    items.resize(*index + 1, Value::Null);
                }
                items.get_mut(*index)
            })
        }
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Key(key) if i == 0 => write!(f, "{key}")?,
                Segment::Key(key) => write!(f, ".{key}")?,
                Segment::Index(index) => write!(f, "[{index}]")?,
            }
        }
        Ok(())
    }
}

impl From<&str> for Path {
    fn from(input: &str) -> Self {
        Self::parse(input)
    }
}
