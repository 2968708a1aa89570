// 该文件是 Renmian （人面桃花） 项目的一部分。
// src/model/group.rs - 候选框聚类合并
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

/// 整数矩形，聚类过程中允许出现负坐标
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct Rect {
  pub x: i32,
  pub y: i32,
  pub width: i32,
  pub height: i32,
}

impl Rect {
  pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
    Self {
      x,
      y,
      width,
      height,
    }
  }

  fn similar(&self, other: &Rect, eps: f64) -> bool {
    let delta =
      eps * (self.width.min(other.width) + self.height.min(other.height)) as f64 * 0.5;
    let close = |a: i32, b: i32| ((a - b).abs() as f64) <= delta;
    close(self.x, other.x)
      && close(self.y, other.y)
      && close(self.x + self.width, other.x + other.width)
      && close(self.y + self.height, other.y + other.height)
  }
}

fn round(v: f64) -> i32 {
  v.round_ties_even() as i32
}

/// 并查集划分，返回每个元素的类别编号与类别总数，编号按类别首次出现的顺序分配
fn partition(rects: &[Rect], eps: f64) -> (Vec<usize>, usize) {
  fn find(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
      parent[i] = parent[parent[i]];
      i = parent[i];
    }
    i
  }

  let mut parent = (0..rects.len()).collect::<Vec<_>>();
  for i in 0..rects.len() {
    for j in (i + 1)..rects.len() {
      if rects[i].similar(&rects[j], eps) {
        let (ri, rj) = (find(&mut parent, i), find(&mut parent, j));
        if ri != rj {
          parent[rj] = ri;
        }
      }
    }
  }

  let mut class_of_root = vec![usize::MAX; rects.len()];
  let mut classes = 0;
  let labels = (0..rects.len())
    .map(|i| {
      let root = find(&mut parent, i);
      if class_of_root[root] == usize::MAX {
        class_of_root[root] = classes;
        classes += 1;
      }
      class_of_root[root]
    })
    .collect();
  (labels, classes)
}

/// 合并相似的候选框
///
/// 相似的框聚为一簇后取平均；成员数不超过 `threshold` 的簇被丢弃，
/// 被另一个更可信的簇包含的簇也被丢弃。`threshold` 为 0 时原样返回。
pub(crate) fn group_rectangles(rects: &[Rect], threshold: u32, eps: f64) -> Vec<Rect> {
  if threshold == 0 || rects.is_empty() {
    return rects.to_vec();
  }

  let (labels, classes) = partition(rects, eps);

  let mut sums = vec![[0i64; 4]; classes];
  let mut counts = vec![0u32; classes];
  for (rect, &label) in rects.iter().zip(&labels) {
    let sum = &mut sums[label];
    sum[0] += rect.x as i64;
    sum[1] += rect.y as i64;
    sum[2] += rect.width as i64;
    sum[3] += rect.height as i64;
    counts[label] += 1;
  }

  let averaged = sums
    .iter()
    .zip(&counts)
    .map(|(sum, &n)| {
      let s = 1.0 / n as f64;
      Rect::new(
        round(sum[0] as f64 * s),
        round(sum[1] as f64 * s),
        round(sum[2] as f64 * s),
        round(sum[3] as f64 * s),
      )
    })
    .collect::<Vec<_>>();

  let mut grouped = Vec::new();
  for (i, r1) in averaged.iter().enumerate() {
    let n1 = counts[i];
    if n1 <= threshold {
      continue;
    }

    let swallowed = averaged.iter().enumerate().any(|(j, r2)| {
      let n2 = counts[j];
      if j == i || n2 <= threshold {
        return false;
      }
      let dx = round(r2.width as f64 * eps);
      let dy = round(r2.height as f64 * eps);
      r1.x >= r2.x - dx
        && r1.y >= r2.y - dy
        && r1.x + r1.width <= r2.x + r2.width + dx
        && r1.y + r1.height <= r2.y + r2.height + dy
        && (n2 > n1.max(3) || n1 < 3)
    });

    if !swallowed {
      grouped.push(*r1);
    }
  }
  grouped
}
