//! Очередь с приоритетом для событий: красно-чёрное дерево узлов `(tick, priority)`
//!
//! Каждый узел хранит список событий с одинаковым ключом. Порядок внутри узла
//! задаётся только флагом FIFO/LIFO при вставке: FIFO добавляет в конец,
//! LIFO — в начало (событие становится следующим к исполнению).
//!
//! Узлы живут в арене (`Vec`), ссылки — индексы. Индекс 0 занят
//! чёрным сторожевым узлом `NIL`, как в классическом алгоритме удаления.

use std::cell::Cell;
use std::cmp::Ordering;
use std::collections::VecDeque;

use thiserror::Error;

use super::event::Priority;
use super::time::Tick;
use crate::SimError;

type NodeId = usize;

const NIL: NodeId = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    Red,
    Black,
}

/// Нарушение инварианта дерева, найденное `verify()`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TreeViolation {
    #[error("root node is red")]
    RedRoot,

    #[error("broken parent link at ({tick}, {priority})")]
    ParentLink { tick: Tick, priority: Priority },

    #[error("key order violated at ({tick}, {priority})")]
    KeyOrder { tick: Tick, priority: Priority },

    #[error("red node ({tick}, {priority}) has a red child")]
    RedRed { tick: Tick, priority: Priority },

    #[error("unequal black height below ({tick}, {priority})")]
    BlackHeight { tick: Tick, priority: Priority },

    #[error("node ({tick}, {priority}) has no events")]
    EmptyNode { tick: Tick, priority: Priority },

    #[error("cached minimum is stale")]
    StaleMinimum,

    #[error("bookkeeping mismatch: {nodes} nodes / {events} events counted")]
    CountMismatch { nodes: usize, events: usize },
}

/// Узел дерева: все ожидающие события с одним ключом `(tick, priority)`
#[derive(Debug)]
pub struct EventNode<E> {
    tick: Tick,
    priority: Priority,
    events: VecDeque<E>,
    color: Color,
    left: NodeId,
    right: NodeId,
    parent: NodeId,
}

impl<E> EventNode<E> {
    fn new(tick: Tick, priority: Priority, parent: NodeId) -> Self {
        Self {
            tick,
            priority,
            events: VecDeque::new(),
            color: Color::Red,
            left: NIL,
            right: NIL,
            parent,
        }
    }

    fn sentinel() -> Self {
        Self {
            color: Color::Black,
            ..Self::new(0, 0, NIL)
        }
    }

    pub fn tick(&self) -> Tick {
        self.tick
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn key(&self) -> (Tick, Priority) {
        (self.tick, self.priority)
    }

    /// События узла в порядке исполнения
    pub fn events(&self) -> impl Iterator<Item = &E> {
        self.events.iter()
    }

    pub fn first(&self) -> Option<&E> {
        self.events.front()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Сбалансированное дерево узлов событий
#[derive(Debug)]
pub struct EventTree<E> {
    nodes: Vec<EventNode<E>>,
    free: Vec<NodeId>,
    root: NodeId,
    /// Кэш самого левого узла; `None` — устарел и будет пересчитан
    min_cache: Cell<Option<NodeId>>,
    node_count: usize,
    event_count: usize,
}

impl<E> EventTree<E> {
    pub fn new() -> Self {
        Self {
            nodes: vec![EventNode::sentinel()],
            free: Vec::new(),
            root: NIL,
            min_cache: Cell::new(None),
            node_count: 0,
            event_count: 0,
        }
    }

    /// Количество ожидающих событий
    pub fn len(&self) -> usize {
        self.event_count
    }

    pub fn node_count(&self) -> usize {
        self.node_count
    }

    pub fn is_empty(&self) -> bool {
        self.root == NIL
    }

    /// Вставить событие. Для существующего ключа событие попадает в список
    /// узла: в конец при `fifo`, в начало иначе.
    pub fn insert(&mut self, tick: Tick, priority: Priority, event: E, fifo: bool) {
        let key = (tick, priority);
        let mut parent = NIL;
        let mut cur = self.root;
        while cur != NIL {
            parent = cur;
            match key.cmp(&self.key(cur)) {
                Ordering::Less => cur = self.nodes[cur].left,
                Ordering::Greater => cur = self.nodes[cur].right,
                Ordering::Equal => {
                    self.push_event(cur, event, fifo);
                    return;
                }
            }
        }

        let z = self.alloc(tick, priority, parent);
        if parent == NIL {
            self.root = z;
        } else if key < self.key(parent) {
            self.nodes[parent].left = z;
        } else {
            self.nodes[parent].right = z;
        }
        self.push_event(z, event, fifo);
        self.node_count += 1;

        if self.root == z {
            self.min_cache.set(Some(z));
        } else if let Some(min) = self.min_cache.get() {
            if key < self.key(min) {
                self.min_cache.set(Some(z));
            }
        }

        self.insert_fixup(z);
    }

    /// Узел с наименьшим ключом — следующий к исполнению
    pub fn minimum(&self) -> Option<&EventNode<E>> {
        self.min_id().map(|id| &self.nodes[id])
    }

    pub fn find(&self, tick: Tick, priority: Priority) -> Option<&EventNode<E>> {
        self.find_id(tick, priority).map(|id| &self.nodes[id])
    }

    /// Извлечь первое событие минимального узла; опустевший узел удаляется
    pub fn pop_first(&mut self) -> Option<(Tick, Priority, E)> {
        let id = self.min_id()?;
        let event = self.nodes[id].events.pop_front()?;
        self.event_count -= 1;
        let (tick, priority) = self.key(id);
        if self.nodes[id].events.is_empty() {
            self.delete_node(id);
        }
        Some((tick, priority, event))
    }

    /// Изъять конкретное событие из узла `(tick, priority)`
    pub fn remove_where<F>(&mut self, tick: Tick, priority: Priority, pred: F) -> Option<E>
    where
        F: FnMut(&E) -> bool,
    {
        let id = self.find_id(tick, priority)?;
        let pos = self.nodes[id].events.iter().position(pred)?;
        let event = self.nodes[id].events.remove(pos)?;
        self.event_count -= 1;
        if self.nodes[id].events.is_empty() {
            self.delete_node(id);
        }
        Some(event)
    }

    /// Удалить узел по ключу. Отсутствие узла — ошибка программирования:
    /// вызывающий код только что опустошил его список.
    pub fn remove(&mut self, tick: Tick, priority: Priority) -> Result<Vec<E>, SimError> {
        let id = self
            .find_id(tick, priority)
            .ok_or(SimError::MissingNode { tick, priority })?;
        let events: Vec<E> = self.nodes[id].events.drain(..).collect();
        self.event_count -= events.len();
        self.delete_node(id);
        Ok(events)
    }

    /// Обход узлов по возрастанию ключа
    pub fn iter(&self) -> Iter<'_, E> {
        let mut iter = Iter {
            tree: self,
            stack: Vec::new(),
        };
        iter.push_left(self.root);
        iter
    }

    /// Забрать все события в порядке исполнения и очистить дерево
    pub fn drain(&mut self) -> Vec<E> {
        let order: Vec<NodeId> = {
            let mut ids = Vec::with_capacity(self.node_count);
            let mut stack = Vec::new();
            let mut cur = self.root;
            while cur != NIL || !stack.is_empty() {
                while cur != NIL {
                    stack.push(cur);
                    cur = self.nodes[cur].left;
                }
                if let Some(id) = stack.pop() {
                    ids.push(id);
                    cur = self.nodes[id].right;
                }
            }
            ids
        };

        let mut events = Vec::with_capacity(self.event_count);
        for id in order {
            events.extend(self.nodes[id].events.drain(..));
        }
        *self = Self::new();
        events
    }

    /// Проверка инвариантов: связи, порядок ключей, отсутствие красного
    /// ребёнка у красного узла, равная чёрная высота. Только для тестов.
    pub fn verify(&self) -> Result<(), TreeViolation> {
        if self.root == NIL {
            if self.node_count != 0 || self.event_count != 0 {
                return Err(TreeViolation::CountMismatch { nodes: 0, events: 0 });
            }
            return Ok(());
        }

        let root = &self.nodes[self.root];
        if root.parent != NIL {
            return Err(TreeViolation::ParentLink {
                tick: root.tick,
                priority: root.priority,
            });
        }
        if root.color == Color::Red {
            return Err(TreeViolation::RedRoot);
        }

        let mut nodes = 0;
        let mut events = 0;
        self.verify_node(self.root, None, None, &mut nodes, &mut events)?;
        if nodes != self.node_count || events != self.event_count {
            return Err(TreeViolation::CountMismatch { nodes, events });
        }

        if let Some(min) = self.min_cache.get() {
            if min != self.subtree_min(self.root) {
                return Err(TreeViolation::StaleMinimum);
            }
        }
        Ok(())
    }

    fn verify_node(
        &self,
        id: NodeId,
        lower: Option<(Tick, Priority)>,
        upper: Option<(Tick, Priority)>,
        nodes: &mut usize,
        events: &mut usize,
    ) -> Result<usize, TreeViolation> {
        if id == NIL {
            return Ok(1);
        }
        let node = &self.nodes[id];
        let (tick, priority) = node.key();
        *nodes += 1;
        *events += node.events.len();

        if lower.map_or(false, |l| node.key() <= l) || upper.map_or(false, |u| node.key() >= u) {
            return Err(TreeViolation::KeyOrder { tick, priority });
        }
        if node.events.is_empty() {
            return Err(TreeViolation::EmptyNode { tick, priority });
        }
        for child in [node.left, node.right] {
            if child != NIL && self.nodes[child].parent != id {
                return Err(TreeViolation::ParentLink { tick, priority });
            }
        }
        if node.color == Color::Red
            && (self.color(node.left) == Color::Red || self.color(node.right) == Color::Red)
        {
            return Err(TreeViolation::RedRed { tick, priority });
        }

        let left = self.verify_node(node.left, lower, Some(node.key()), nodes, events)?;
        let right = self.verify_node(node.right, Some(node.key()), upper, nodes, events)?;
        if left != right {
            return Err(TreeViolation::BlackHeight { tick, priority });
        }
        Ok(left + usize::from(node.color == Color::Black))
    }

    fn key(&self, id: NodeId) -> (Tick, Priority) {
        self.nodes[id].key()
    }

    fn color(&self, id: NodeId) -> Color {
        self.nodes[id].color
    }

    fn set_color(&mut self, id: NodeId, color: Color) {
        // NIL всегда чёрный
        if id != NIL {
            self.nodes[id].color = color;
        }
    }

    fn push_event(&mut self, id: NodeId, event: E, fifo: bool) {
        if fifo {
            self.nodes[id].events.push_back(event);
        } else {
            self.nodes[id].events.push_front(event);
        }
        self.event_count += 1;
    }

    fn alloc(&mut self, tick: Tick, priority: Priority, parent: NodeId) -> NodeId {
        let node = EventNode::new(tick, priority, parent);
        match self.free.pop() {
            Some(id) => {
                self.nodes[id] = node;
                id
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    fn release(&mut self, id: NodeId) {
        let node = &mut self.nodes[id];
        node.left = NIL;
        node.right = NIL;
        node.parent = NIL;
        node.events.clear();
        self.free.push(id);
    }

    fn min_id(&self) -> Option<NodeId> {
        if self.root == NIL {
            return None;
        }
        if let Some(id) = self.min_cache.get() {
            return Some(id);
        }
        let id = self.subtree_min(self.root);
        self.min_cache.set(Some(id));
        Some(id)
    }

    fn find_id(&self, tick: Tick, priority: Priority) -> Option<NodeId> {
        let key = (tick, priority);
        let mut cur = self.root;
        while cur != NIL {
            match key.cmp(&self.key(cur)) {
                Ordering::Less => cur = self.nodes[cur].left,
                Ordering::Greater => cur = self.nodes[cur].right,
                Ordering::Equal => return Some(cur),
            }
        }
        None
    }

    fn subtree_min(&self, mut id: NodeId) -> NodeId {
        while self.nodes[id].left != NIL {
            id = self.nodes[id].left;
        }
        id
    }

    fn rotate_left(&mut self, x: NodeId) {
        let y = self.nodes[x].right;
        let y_left = self.nodes[y].left;
        self.nodes[x].right = y_left;
        if y_left != NIL {
            self.nodes[y_left].parent = x;
        }
        let xp = self.nodes[x].parent;
        self.nodes[y].parent = xp;
        if xp == NIL {
            self.root = y;
        } else if x == self.nodes[xp].left {
            self.nodes[xp].left = y;
        } else {
            self.nodes[xp].right = y;
        }
        self.nodes[y].left = x;
        self.nodes[x].parent = y;
    }

    fn rotate_right(&mut self, x: NodeId) {
        let y = self.nodes[x].left;
        let y_right = self.nodes[y].right;
        self.nodes[x].left = y_right;
        if y_right != NIL {
            self.nodes[y_right].parent = x;
        }
        let xp = self.nodes[x].parent;
        self.nodes[y].parent = xp;
        if xp == NIL {
            self.root = y;
        } else if x == self.nodes[xp].right {
            self.nodes[xp].right = y;
        } else {
            self.nodes[xp].left = y;
        }
        self.nodes[y].right = x;
        self.nodes[x].parent = y;
    }

    fn insert_fixup(&mut self, mut z: NodeId) {
        while self.color(self.nodes[z].parent) == Color::Red {
            let p = self.nodes[z].parent;
            let g = self.nodes[p].parent;
            if p == self.nodes[g].left {
                let uncle = self.nodes[g].right;
                if self.color(uncle) == Color::Red {
                    self.set_color(p, Color::Black);
                    self.set_color(uncle, Color::Black);
                    self.set_color(g, Color::Red);
                    z = g;
                } else {
                    if z == self.nodes[p].right {
                        z = p;
                        self.rotate_left(z);
                    }
                    let p = self.nodes[z].parent;
                    let g = self.nodes[p].parent;
                    self.set_color(p, Color::Black);
                    self.set_color(g, Color::Red);
                    self.rotate_right(g);
                }
            } else {
                let uncle = self.nodes[g].left;
                if self.color(uncle) == Color::Red {
                    self.set_color(p, Color::Black);
                    self.set_color(uncle, Color::Black);
                    self.set_color(g, Color::Red);
                    z = g;
                } else {
                    if z == self.nodes[p].left {
                        z = p;
                        self.rotate_right(z);
                    }
                    let p = self.nodes[z].parent;
                    let g = self.nodes[p].parent;
                    self.set_color(p, Color::Black);
                    self.set_color(g, Color::Red);
                    self.rotate_left(g);
                }
            }
        }
        let root = self.root;
        self.set_color(root, Color::Black);
    }

    fn transplant(&mut self, u: NodeId, v: NodeId) {
        let up = self.nodes[u].parent;
        if up == NIL {
            self.root = v;
        } else if u == self.nodes[up].left {
            self.nodes[up].left = v;
        } else {
            self.nodes[up].right = v;
        }
        // у NIL родитель тоже выставляется: на него опирается delete_fixup
        self.nodes[v].parent = up;
    }

    fn delete_node(&mut self, z: NodeId) {
        let mut removed_color = self.color(z);
        let x;
        if self.nodes[z].left == NIL {
            x = self.nodes[z].right;
            self.transplant(z, x);
        } else if self.nodes[z].right == NIL {
            x = self.nodes[z].left;
            self.transplant(z, x);
        } else {
            let y = self.subtree_min(self.nodes[z].right);
            removed_color = self.color(y);
            x = self.nodes[y].right;
            if self.nodes[y].parent == z {
                self.nodes[x].parent = y;
            } else {
                self.transplant(y, x);
                let zr = self.nodes[z].right;
                self.nodes[y].right = zr;
                self.nodes[zr].parent = y;
            }
            self.transplant(z, y);
            let zl = self.nodes[z].left;
            self.nodes[y].left = zl;
            self.nodes[zl].parent = y;
            self.nodes[y].color = self.color(z);
        }

        if removed_color == Color::Black {
            self.delete_fixup(x);
        }
        self.nodes[NIL].parent = NIL;

        if self.min_cache.get() == Some(z) {
            self.min_cache.set(None);
        }
        self.release(z);
        self.node_count -= 1;
    }

    fn delete_fixup(&mut self, mut x: NodeId) {
        while x != self.root && self.color(x) == Color::Black {
            let p = self.nodes[x].parent;
            if x == self.nodes[p].left {
                let mut w = self.nodes[p].right;
                if self.color(w) == Color::Red {
                    self.set_color(w, Color::Black);
                    self.set_color(p, Color::Red);
                    self.rotate_left(p);
                    w = self.nodes[self.nodes[x].parent].right;
                }
                if self.color(self.nodes[w].left) == Color::Black
                    && self.color(self.nodes[w].right) == Color::Black
                {
                    self.set_color(w, Color::Red);
                    x = self.nodes[x].parent;
                } else {
                    if self.color(self.nodes[w].right) == Color::Black {
                        let wl = self.nodes[w].left;
                        self.set_color(wl, Color::Black);
                        self.set_color(w, Color::Red);
                        self.rotate_right(w);
                        w = self.nodes[self.nodes[x].parent].right;
                    }
                    let px = self.nodes[x].parent;
                    let pc = self.color(px);
                    self.set_color(w, pc);
                    self.set_color(px, Color::Black);
                    let wr = self.nodes[w].right;
                    self.set_color(wr, Color::Black);
                    self.rotate_left(px);
                    x = self.root;
                }
            } else {
                let mut w = self.nodes[p].left;
                if self.color(w) == Color::Red {
                    self.set_color(w, Color::Black);
                    self.set_color(p, Color::Red);
                    self.rotate_right(p);
                    w = self.nodes[self.nodes[x].parent].left;
                }
                if self.color(self.nodes[w].right) == Color::Black
                    && self.color(self.nodes[w].left) == Color::Black
                {
                    self.set_color(w, Color::Red);
                    x = self.nodes[x].parent;
                } else {
                    if self.color(self.nodes[w].left) == Color::Black {
                        let wr = self.nodes[w].right;
                        self.set_color(wr, Color::Black);
                        self.set_color(w, Color::Red);
                        self.rotate_left(w);
                        w = self.nodes[self.nodes[x].parent].left;
                    }
                    let px = self.nodes[x].parent;
                    let pc = self.color(px);
                    self.set_color(w, pc);
                    self.set_color(px, Color::Black);
                    let wl = self.nodes[w].left;
                    self.set_color(wl, Color::Black);
                    self.rotate_right(px);
                    x = self.root;
                }
            }
        }
        self.set_color(x, Color::Black);
    }
}

impl<E> Default for EventTree<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Итератор по узлам в порядке возрастания ключа
pub struct Iter<'a, E> {
    tree: &'a EventTree<E>,
    stack: Vec<NodeId>,
}

impl<'a, E> Iter<'a, E> {
    fn push_left(&mut self, mut id: NodeId) {
        while id != NIL {
            self.stack.push(id);
            id = self.tree.nodes[id].left;
        }
    }
}

impl<'a, E> Iterator for Iter<'a, E> {
    type Item = &'a EventNode<E>;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.stack.pop()?;
        self.push_left(self.tree.nodes[id].right);
        Some(&self.tree.nodes[id])
    }
}
